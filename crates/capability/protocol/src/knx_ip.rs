//! KNXnet/IP 路由传输实现
//!
//! 加入路由组播（默认 224.0.23.12:3671），接收 cEMI `L_Data.ind` 组报文；
//! 写入时发送 GroupValueWrite 路由指示。只处理组地址报文。

use crate::Transport;
use crate::error::TransportError;
use crate::types::ReadMode;
use async_trait::async_trait;
use domain::{RawMessage, RawPayload, WireValue};
use ems_codec::TranscodeError;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, info};

const HEADER_LEN: u8 = 0x06;
const PROTOCOL_VERSION: u8 = 0x10;
const ROUTING_INDICATION: u16 = 0x0530;
const CEMI_L_DATA_REQ: u8 = 0x11;
const CEMI_L_DATA_IND: u8 = 0x29;
const APCI_RESPONSE: u8 = 0x40;
const APCI_WRITE: u8 = 0x80;

/// KNXnet/IP 路由配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnxIpConfig {
    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 加入组播使用的本地接口
    #[serde(default = "default_interface")]
    pub interface: Ipv4Addr,
    /// 本设备的个体地址（"area.line.device"）
    #[serde(default = "default_individual_address")]
    pub individual_address: String,
}

fn default_multicast_addr() -> Ipv4Addr {
    Ipv4Addr::new(224, 0, 23, 12)
}

fn default_port() -> u16 {
    3671
}

fn default_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_individual_address() -> String {
    "15.15.250".to_string()
}

/// 解析出的组报文。
#[derive(Debug, Clone, PartialEq)]
pub struct GroupTelegram {
    pub source: u16,
    pub group: u16,
    pub value: WireValue,
}

/// 组地址 "main/middle/sub" -> u16。
pub fn parse_group_address(text: &str) -> Option<u16> {
    let parts: Vec<u16> = text
        .split('/')
        .map(|part| part.trim().parse::<u16>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [main, middle, sub] if *main <= 31 && *middle <= 7 && *sub <= 255 => {
            Some((main << 11) | (middle << 8) | sub)
        }
        _ => None,
    }
}

pub fn format_group_address(address: u16) -> String {
    format!(
        "{}/{}/{}",
        address >> 11,
        (address >> 8) & 0x07,
        address & 0xff
    )
}

fn parse_individual_address(text: &str) -> Option<u16> {
    let parts: Vec<u16> = text
        .split('.')
        .map(|part| part.trim().parse::<u16>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [area, line, device] if *area <= 15 && *line <= 15 && *device <= 255 => {
            Some((area << 12) | (line << 8) | device)
        }
        _ => None,
    }
}

/// 解析路由指示帧中的 GroupValueWrite / GroupValueResponse。
///
/// 其他服务类型、个体地址报文、GroupValueRead 均返回 `None`。
pub fn decode_routing_indication(frame: &[u8]) -> Option<GroupTelegram> {
    if frame.len() < 6 || frame[0] != HEADER_LEN || frame[1] != PROTOCOL_VERSION {
        return None;
    }
    if u16::from_be_bytes([frame[2], frame[3]]) != ROUTING_INDICATION {
        return None;
    }
    let total = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    if total > frame.len() {
        return None;
    }
    let cemi = &frame[6..total];
    if cemi.len() < 2 || !matches!(cemi[0], CEMI_L_DATA_IND | CEMI_L_DATA_REQ) {
        return None;
    }
    let base = 2 + cemi[1] as usize;
    let header = cemi.get(base..base + 7)?;
    let ctrl2 = header[1];
    if ctrl2 & 0x80 == 0 {
        return None;
    }
    let source = u16::from_be_bytes([header[2], header[3]]);
    let group = u16::from_be_bytes([header[4], header[5]]);
    let npdu_len = header[6] as usize;
    let tpdu = cemi.get(base + 7..base + 8 + npdu_len)?;
    if tpdu.len() < 2 {
        return None;
    }
    let apci = tpdu[1] & 0xc0;
    if tpdu[0] & 0x03 != 0 || !matches!(apci, APCI_WRITE | APCI_RESPONSE) {
        return None;
    }
    let value = if npdu_len == 1 {
        WireValue::Bits(tpdu[1] & 0x3f)
    } else {
        WireValue::Bytes(tpdu[2..].to_vec())
    };
    Some(GroupTelegram {
        source,
        group,
        value,
    })
}

/// 构造 GroupValueWrite 路由指示帧。
pub fn encode_group_write(source: u16, group: u16, value: &WireValue) -> Result<Vec<u8>, String> {
    let (short, data): (u8, &[u8]) = match value {
        WireValue::Bits(bits) if *bits <= 0x3f => (*bits, &[]),
        WireValue::Bool(flag) => (u8::from(*flag), &[]),
        WireValue::Bytes(bytes) if !bytes.is_empty() && bytes.len() <= 14 => (0, bytes.as_slice()),
        other => return Err(format!("cannot send {:?} as a group value", other)),
    };

    let mut cemi = vec![CEMI_L_DATA_IND, 0x00, 0xbc, 0xe0];
    cemi.extend_from_slice(&source.to_be_bytes());
    cemi.extend_from_slice(&group.to_be_bytes());
    cemi.push((1 + data.len()) as u8);
    cemi.push(0x00);
    cemi.push(APCI_WRITE | short);
    cemi.extend_from_slice(data);

    let total = (6 + cemi.len()) as u16;
    let mut frame = vec![HEADER_LEN, PROTOCOL_VERSION];
    frame.extend_from_slice(&ROUTING_INDICATION.to_be_bytes());
    frame.extend_from_slice(&total.to_be_bytes());
    frame.extend_from_slice(&cemi);
    Ok(frame)
}

/// KNXnet/IP 路由传输
pub struct KnxIpTransport {
    config: KnxIpConfig,
    source: u16,
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl KnxIpTransport {
    pub fn new(config: KnxIpConfig) -> Result<Self, TransportError> {
        let source = parse_individual_address(&config.individual_address).ok_or_else(|| {
            TransportError::ConfigParse(format!(
                "invalid individual address: {}",
                config.individual_address
            ))
        })?;
        if !config.multicast_addr.is_multicast() {
            return Err(TransportError::ConfigParse(format!(
                "{} is not a multicast address",
                config.multicast_addr
            )));
        }
        Ok(Self {
            config,
            source,
            socket: Mutex::new(None),
        })
    }

    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, TransportError> {
        let config: KnxIpConfig =
            serde_json::from_str(json).map_err(|e| TransportError::ConfigParse(e.to_string()))?;
        Self::new(config)
    }

    async fn socket(&self) -> Result<Arc<UdpSocket>, TransportError> {
        self.socket
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn group_endpoint(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.config.multicast_addr, self.config.port))
    }
}

#[async_trait]
impl Transport for KnxIpTransport {
    fn name(&self) -> &str {
        "knx"
    }

    fn read_mode(&self) -> ReadMode {
        ReadMode::Pushed
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut guard = self.socket.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.port))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        socket
            .join_multicast_v4(self.config.multicast_addr, self.config.interface)
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        info!(
            target: "ems.protocol",
            group = %self.group_endpoint(),
            "knx_routing_joined"
        );
        *guard = Some(Arc::new(socket));
        Ok(())
    }

    async fn read_raw(&self) -> Result<RawMessage, TransportError> {
        let socket = self.socket().await?;
        let mut buf = [0u8; 512];
        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    self.socket.lock().await.take();
                    return Err(TransportError::Io(err));
                }
            };
            let Some(telegram) = decode_routing_indication(&buf[..len]) else {
                continue;
            };
            if telegram.source == self.source {
                continue;
            }
            let key = format_group_address(telegram.group);
            debug!(
                target: "ems.protocol",
                peer = %peer,
                group = %key,
                value = %telegram.value,
                "knx_group_telegram"
            );
            return Ok(RawMessage::new(RawPayload::Fields(vec![(key, telegram.value)])));
        }
    }

    async fn write_raw(&self, key: &str, value: &WireValue) -> Result<(), TransportError> {
        let group = parse_group_address(key)
            .ok_or_else(|| TransportError::Unsupported(format!("{} is not a group address", key)))?;
        let frame = encode_group_write(self.source, group, value)
            .map_err(|reason| TranscodeError::Unsupported(key.to_string(), reason))?;
        let socket = self.socket().await?;
        socket.send_to(&frame, self.group_endpoint()).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(socket) = self.socket.lock().await.take() {
            let _ = socket.leave_multicast_v4(self.config.multicast_addr, self.config.interface);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_address_round_trip() {
        assert_eq!(parse_group_address("1/2/3"), Some(0x0a03));
        assert_eq!(format_group_address(0x0a03), "1/2/3");
        assert_eq!(parse_group_address("32/0/0"), None);
        assert_eq!(parse_group_address("1/2"), None);
    }

    #[test]
    fn decode_switch_telegram() {
        let frame = [
            0x06, 0x10, 0x05, 0x30, 0x00, 0x11, // header
            0x29, 0x00, 0xbc, 0xe0, 0x11, 0x05, 0x0a, 0x03, 0x01, 0x00, 0x81,
        ];
        let telegram = decode_routing_indication(&frame).unwrap();
        assert_eq!(telegram.source, 0x1105);
        assert_eq!(format_group_address(telegram.group), "1/2/3");
        assert_eq!(telegram.value, WireValue::Bits(1));
    }

    #[test]
    fn decode_float_telegram() {
        let frame = encode_group_write(0x1105, 0x0a03, &WireValue::Bytes(vec![0x0c, 0x33])).unwrap();
        let telegram = decode_routing_indication(&frame).unwrap();
        assert_eq!(telegram.value, WireValue::Bytes(vec![0x0c, 0x33]));
    }

    #[test]
    fn read_requests_are_ignored() {
        let frame = [
            0x06, 0x10, 0x05, 0x30, 0x00, 0x11, 0x29, 0x00, 0xbc, 0xe0, 0x11, 0x05, 0x0a, 0x03,
            0x01, 0x00, 0x00,
        ];
        assert!(decode_routing_indication(&frame).is_none());
    }

    #[test]
    fn registers_cannot_be_sent() {
        assert!(encode_group_write(1, 2, &WireValue::Registers(vec![1])).is_err());
    }

    #[test]
    fn config_defaults() {
        let transport = KnxIpTransport::from_json("{}").unwrap();
        assert_eq!(transport.group_endpoint().to_string(), "224.0.23.12:3671");
        assert_eq!(transport.source, 0xfffa);
    }
}
