//! NetworkSink - one UDP datagram per delivery record.
//!
//! 每个数据报带有递增序号，接收端据此发现丢包。
//! `failures_only` 时只发送失败帧、丢帧占位和结束标记。

use std::collections::HashMap;
use std::net::SocketAddr;

use contracts::{ConsumerSink, ContractError, Delivery, DeliveryEvent, DeliveryRecord};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, instrument, trace, warn};

/// IPv4 UDP payload limit
const MAX_DATAGRAM: usize = 65_507;

/// Wire encoding of the datagram body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkFormat {
    #[default]
    Json,
    Bincode,
}

/// Datagram body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datagram {
    /// 发送端序号，从 0 开始
    pub seq: u64,
    pub record: DeliveryRecord,
}

/// Configuration for NetworkSink
#[derive(Debug, Clone)]
pub struct NetworkSinkConfig {
    pub addr: SocketAddr,
    pub format: NetworkFormat,
    pub max_packet_size: usize,
    /// 跳过通过校验的帧
    pub failures_only: bool,
}

impl NetworkSinkConfig {
    /// Parse `addr`, `format`, `max_packet_size` and `failures_only`
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ContractError> {
        let invalid = |field: &str, message: String| {
            ContractError::config_validation(format!("consumers.params.{field}"), message)
        };

        let addr = params
            .get("addr")
            .ok_or_else(|| invalid("addr", "network consumer needs an address".into()))?;
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| invalid("addr", format!("'{addr}' is not a socket address: {e}")))?;

        let format = match params.get("format").map(String::as_str) {
            None | Some("json") => NetworkFormat::Json,
            Some("bincode") => NetworkFormat::Bincode,
            Some(other) => return Err(invalid("format", format!("unknown format '{other}'"))),
        };

        let max_packet_size = match params.get("max_packet_size") {
            None => MAX_DATAGRAM,
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|size| (1..=MAX_DATAGRAM).contains(size))
                .ok_or_else(|| {
                    invalid(
                        "max_packet_size",
                        format!("'{raw}' must be between 1 and {MAX_DATAGRAM}"),
                    )
                })?,
        };

        let failures_only = params
            .get("failures_only")
            .is_some_and(|v| matches!(v.as_str(), "true" | "1" | "yes"));

        Ok(Self {
            addr,
            format,
            max_packet_size,
            failures_only,
        })
    }
}

/// Streams delivery records to a UDP peer
pub struct NetworkSink {
    name: String,
    config: NetworkSinkConfig,
    socket: Option<UdpSocket>,
    next_seq: u64,
}

impl NetworkSink {
    #[instrument(name = "network_sink_new", skip(name, config), fields(target = %config.addr))]
    pub async fn new(name: impl Into<String>, config: NetworkSinkConfig) -> std::io::Result<Self> {
        let name = name.into();
        let local: SocketAddr = if config.addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(config.addr).await?;
        debug!(sink = %name, "NetworkSink connected");

        Ok(Self {
            name,
            config,
            socket: Some(socket),
            next_seq: 0,
        })
    }

    pub async fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = NetworkSinkConfig::from_params(params)?;
        Self::new(name.clone(), config)
            .await
            .map_err(|e| ContractError::SinkConnection {
                sink_name: name,
                message: e.to_string(),
            })
    }

    fn wanted(&self, delivery: &Delivery) -> bool {
        !self.config.failures_only
            || !matches!(delivery.event, DeliveryEvent::Verified { failed: false, .. })
    }

    fn encode(&self, datagram: &Datagram) -> Result<Vec<u8>, ContractError> {
        let body = match self.config.format {
            NetworkFormat::Json => serde_json::to_vec(datagram).map_err(|e| e.to_string()),
            NetworkFormat::Bincode => bincode::serialize(datagram).map_err(|e| e.to_string()),
        }
        .map_err(|e| ContractError::sink_write(&self.name, e))?;

        if body.len() > self.config.max_packet_size {
            return Err(ContractError::sink_write(
                &self.name,
                format!(
                    "datagram of {} bytes exceeds max_packet_size {}",
                    body.len(),
                    self.config.max_packet_size
                ),
            ));
        }
        Ok(body)
    }
}

impl ConsumerSink for NetworkSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "network_sink_write",
        skip(self, delivery),
        fields(sink = %self.name, data_type = %delivery.data_type, index = delivery.index)
    )]
    async fn write(&mut self, delivery: &Delivery) -> Result<(), ContractError> {
        if !self.wanted(delivery) {
            return Ok(());
        }
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| ContractError::sink_write(&self.name, "socket closed"))?;

        let datagram = Datagram {
            seq: self.next_seq,
            record: delivery.record(),
        };
        let body = self.encode(&datagram)?;
        // 序号在编码成功后才前进；发送失败同样占用序号，接收端可见为丢包
        self.next_seq += 1;

        match socket.send(&body).await {
            Ok(sent) => trace!(seq = datagram.seq, bytes = sent, "datagram sent"),
            Err(e) => warn!(seq = datagram.seq, error = %e, "UDP send failed"),
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        self.socket = None;
        debug!(sink = %self.name, sent = self.next_seq, "NetworkSink closed");
        Ok(())
    }
}
