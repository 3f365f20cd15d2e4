//! TCP session with a ZK time-clock terminal.

use crate::error::{DeviceError, DeviceResult};
use crate::protocol::{
    self, Packet, CMD_ACK_OK, CMD_ACK_UNAUTH, CMD_ATTLOG_RRQ, CMD_AUTH, CMD_CONNECT, CMD_DATA,
    CMD_EXIT, CMD_FREE_DATA, CMD_GET_FREE_SIZES, CMD_PREPARE_BUFFER, CMD_PREPARE_DATA,
    CMD_READ_BUFFER, COMMKEY_TICKS, INITIAL_REPLY_ID, MAX_CHUNK, TOP_SIZE,
};
use crate::DeviceEvent;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// An authenticated session with one device.
pub struct ZkClient {
    stream: TcpStream,
    session_id: u16,
    reply_id: u16,
    io_timeout: Duration,
    peer: String,
}

impl ZkClient {
    /// Open a TCP connection and perform the `CMD_CONNECT` handshake.
    ///
    /// If the device demands authentication, `password` is sent as the
    /// comm key.
    pub async fn connect(
        host: &str,
        port: u16,
        password: u32,
        io_timeout: Duration,
    ) -> DeviceResult<Self> {
        let peer = format!("{host}:{port}");
        let stream = bounded(io_timeout, "connect", TcpStream::connect(peer.as_str()))
            .await?
            .map_err(|e| DeviceError::io(&format!("Failed to connect to {peer}"), e))?;

        let mut client = Self {
            stream,
            session_id: 0,
            reply_id: INITIAL_REPLY_ID,
            io_timeout,
            peer,
        };

        let reply = client.send_command(CMD_CONNECT, &[]).await?;
        client.session_id = reply.session_id;

        match reply.command {
            CMD_ACK_OK => {}
            CMD_ACK_UNAUTH => {
                let key = protocol::make_commkey(password, client.session_id, COMMKEY_TICKS);
                let auth = client.send_command(CMD_AUTH, &key).await?;
                if auth.command != CMD_ACK_OK {
                    return Err(DeviceError::Unauthenticated);
                }
            }
            other => {
                return Err(DeviceError::Protocol(format!(
                    "Unexpected reply {other} to connect"
                )));
            }
        }

        info!(peer = %client.peer, session_id = client.session_id, "Device session established");
        Ok(client)
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Number of attendance records currently held by the device.
    pub async fn record_count(&mut self) -> DeviceResult<u32> {
        let reply = self.send_command(CMD_GET_FREE_SIZES, &[]).await?;
        expect_success(&reply, "get free sizes")?;
        protocol::attendance_record_count(&reply.data)
    }

    /// Read the full attendance log.
    pub async fn read_attendance(&mut self) -> DeviceResult<Vec<DeviceEvent>> {
        let records = self.record_count().await?;
        if records == 0 {
            debug!(peer = %self.peer, "Device holds no attendance records");
            return Ok(Vec::new());
        }

        let ceiling = protocol::attendance_buffer_ceiling(records);
        let blob = self.read_with_buffer(CMD_ATTLOG_RRQ, ceiling).await?;
        let events = protocol::decode_attendance(&blob, records)?;
        debug!(peer = %self.peer, records, decoded = events.len(), "Read attendance log");
        Ok(events)
    }

    /// Send `CMD_EXIT` and drop the connection.
    pub async fn exit(mut self) -> DeviceResult<()> {
        let reply = self.send_command(CMD_EXIT, &[]).await?;
        expect_success(&reply, "exit")?;
        debug!(peer = %self.peer, "Device session closed");
        Ok(())
    }

    /// Fetch the output of `command` through the device's buffered transfer.
    ///
    /// An announced size above `ceiling` is refused before anything is read.
    async fn read_with_buffer(&mut self, command: u16, ceiling: u32) -> DeviceResult<Vec<u8>> {
        let request = protocol::prepare_buffer_request(command);
        let reply = self.send_command(CMD_PREPARE_BUFFER, &request).await?;
        expect_success(&reply, "prepare buffer")?;

        if reply.command == CMD_DATA {
            return Ok(reply.data);
        }

        let size = protocol::buffer_size(&reply.data)?;
        if size > ceiling {
            return Err(DeviceError::Protocol(format!(
                "Device announced a {size} byte buffer, expected at most {ceiling}"
            )));
        }
        let mut data = Vec::with_capacity(size as usize);
        let mut start = 0u32;
        while start < size {
            let chunk = (size - start).min(MAX_CHUNK);
            data.extend(self.read_chunk(start, chunk).await?);
            start += chunk;
        }

        let freed = self.send_command(CMD_FREE_DATA, &[]).await?;
        expect_success(&freed, "free data")?;
        Ok(data)
    }

    async fn read_chunk(&mut self, start: u32, size: u32) -> DeviceResult<Vec<u8>> {
        let request = protocol::read_buffer_request(start, size);
        let reply = self.send_command(CMD_READ_BUFFER, &request).await?;

        match reply.command {
            CMD_DATA => Ok(reply.data),
            CMD_PREPARE_DATA => {
                let expected = protocol::prepare_data_size(&reply.data)?;
                if expected > size {
                    return Err(DeviceError::Protocol(format!(
                        "Device offered {expected} bytes for a {size} byte chunk"
                    )));
                }
                let expected = expected as usize;
                let mut chunk = Vec::with_capacity(expected);
                while chunk.len() < expected {
                    let packet = self.read_packet().await?;
                    if packet.command != CMD_DATA {
                        return Err(DeviceError::Protocol(format!(
                            "Expected data packet, got {}",
                            packet.command
                        )));
                    }
                    chunk.extend(packet.data);
                }

                let done = self.read_packet().await?;
                if done.command != CMD_ACK_OK {
                    return Err(DeviceError::Protocol(format!(
                        "Expected end of chunk, got {}",
                        done.command
                    )));
                }
                chunk.truncate(expected);
                Ok(chunk)
            }
            other => Err(DeviceError::Protocol(format!(
                "Device refused chunk read at {start}: reply {other}"
            ))),
        }
    }

    /// Send one command and wait for its reply.
    async fn send_command(&mut self, command: u16, data: &[u8]) -> DeviceResult<Packet> {
        let packet = Packet::request(command, self.session_id, self.reply_id, data);
        let encoded = packet.encode();

        bounded(self.io_timeout, "write", self.stream.write_all(&encoded))
            .await?
            .map_err(|e| DeviceError::io("Failed to write to device", e))?;

        let reply = self.read_packet().await?;
        self.reply_id = reply.reply_id;
        Ok(reply)
    }

    async fn read_packet(&mut self) -> DeviceResult<Packet> {
        let io_timeout = self.io_timeout;
        bounded(io_timeout, "read", self.read_packet_unbounded()).await?
    }

    async fn read_packet_unbounded(&mut self) -> DeviceResult<Packet> {
        let mut top = [0u8; TOP_SIZE];
        self.stream
            .read_exact(&mut top)
            .await
            .map_err(|e| DeviceError::io("Failed to read from device", e))?;
        let len = protocol::parse_top(&top)?;

        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(|e| DeviceError::io("Failed to read from device", e))?;
        Packet::decode(&payload)
    }
}

fn expect_success(reply: &Packet, operation: &str) -> DeviceResult<()> {
    if protocol::is_success(reply.command) {
        Ok(())
    } else {
        Err(DeviceError::Protocol(format!(
            "Device rejected {operation}: reply {}",
            reply.command
        )))
    }
}

async fn bounded<F: Future>(
    limit: Duration,
    operation: &'static str,
    fut: F,
) -> DeviceResult<F::Output> {
    timeout(limit, fut).await.map_err(|_| DeviceError::Timeout {
        operation,
        timeout_ms: limit.as_millis() as u64,
    })
}
