/// 隧道帧协议
///
/// 客户端与中继服务器之间的二进制协议，采用长度前缀（4字节大端）+
/// 固定头部 + 可变体的布局：
///
/// ```text
/// [u32 body_len][u8 type][u64 serial_number][u8 uri_len][uri...][data...]
/// ```
///
/// `body_len` 不包含长度前缀本身，所有整数均为大端序。
use crate::error::{Result, TunnelError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// 长度前缀字段大小
pub const LEN_SIZE: usize = 4;

/// 类型字段大小
pub const TYPE_SIZE: usize = 1;

/// 序列号字段大小
pub const SERIAL_NUMBER_SIZE: usize = 8;

/// URI 长度字段大小
pub const URI_LENGTH_SIZE: usize = 1;

/// 帧体的固定头部大小（类型 + 序列号 + URI 长度）
pub const HEADER_SIZE: usize = TYPE_SIZE + SERIAL_NUMBER_SIZE + URI_LENGTH_SIZE;

/// URI 最大长度（受单字节长度字段限制）
pub const MAX_URI_LEN: usize = 255;

/// 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// 认证消息，携带客户端密钥
    Auth = 0x01,

    /// 会话建立：中继下发时 data 为真实服务地址，
    /// 客户端在数据通道上回发时 uri 为 `session@clientKey`
    Connect = 0x03,

    /// 会话断开
    Disconnect = 0x04,

    /// 代理数据传输
    Transfer = 0x05,

    /// 可写状态同步（保留，当前逻辑未使用）
    WriteControl = 0x06,

    /// 心跳消息
    Heartbeat = 0x07,
}

impl TryFrom<u8> for FrameType {
    type Error = TunnelError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameType::Auth),
            0x03 => Ok(FrameType::Connect),
            0x04 => Ok(FrameType::Disconnect),
            0x05 => Ok(FrameType::Transfer),
            0x06 => Ok(FrameType::WriteControl),
            0x07 => Ok(FrameType::Heartbeat),
            other => Err(TunnelError::protocol(format!(
                "unknown frame type: {:#04x}",
                other
            ))),
        }
    }
}

/// 一个完整的协议帧，解码后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 帧类型
    pub frame_type: FrameType,

    /// 序列号（保留字段，当前不用于请求响应关联）
    pub serial_number: u64,

    /// 语义随帧类型变化：AUTH 为客户端密钥，CONNECT/DISCONNECT 为会话标识
    pub uri: String,

    /// 不透明载荷
    pub data: Bytes,
}

impl Frame {
    /// 创建只带类型的空帧（心跳等）
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            serial_number: 0,
            uri: String::new(),
            data: Bytes::new(),
        }
    }

    /// 创建带会话标识的帧
    pub fn with_uri(frame_type: FrameType, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::new(frame_type)
        }
    }

    /// 创建携带载荷的数据帧
    pub fn transfer(data: Bytes) -> Self {
        Self {
            data,
            ..Self::new(FrameType::Transfer)
        }
    }

    /// 编码为线上字节序列
    ///
    /// URI 超过 255 字节是调用方的编程错误，直接报错而不是截断
    pub fn encode(&self) -> Result<Bytes> {
        let uri_bytes = self.uri.as_bytes();
        if uri_bytes.len() > MAX_URI_LEN {
            return Err(TunnelError::UriTooLong {
                len: uri_bytes.len(),
            });
        }

        let body_len = HEADER_SIZE + uri_bytes.len() + self.data.len();
        let mut buf = BytesMut::with_capacity(LEN_SIZE + body_len);
        buf.put_u32(body_len as u32);
        buf.put_u8(self.frame_type as u8);
        buf.put_u64(self.serial_number);
        buf.put_u8(uri_bytes.len() as u8);
        buf.put_slice(uri_bytes);
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    /// 从缓冲区头部解码一个帧
    ///
    /// 数据不足时返回 `Ok(None)`（消费 0 字节），调用方应等待更多数据；
    /// 成功时返回帧和精确消费的字节数（`LEN_SIZE + body_len`）。
    /// 缓冲区中可能存在多个连续的帧，调用方需循环解码。
    pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
        if buf.len() < LEN_SIZE {
            return Ok(None);
        }

        let mut prefix = &buf[..LEN_SIZE];
        let body_len = prefix.get_u32() as usize;
        if buf.len() < LEN_SIZE + body_len {
            return Ok(None);
        }

        if body_len < HEADER_SIZE {
            return Err(TunnelError::protocol(format!(
                "frame body too short: {} bytes",
                body_len
            )));
        }

        let mut body = &buf[LEN_SIZE..LEN_SIZE + body_len];
        let frame_type = FrameType::try_from(body.get_u8())?;
        let serial_number = body.get_u64();
        let uri_len = body.get_u8() as usize;
        if uri_len > body.remaining() {
            return Err(TunnelError::protocol(format!(
                "uri length {} exceeds frame body",
                uri_len
            )));
        }

        let uri = String::from_utf8(body[..uri_len].to_vec())
            .map_err(|_| TunnelError::protocol("frame uri is not valid utf-8"))?;
        let data = Bytes::copy_from_slice(&body[uri_len..]);

        Ok(Some((
            Frame {
                frame_type,
                serial_number,
                uri,
                data,
            },
            LEN_SIZE + body_len,
        )))
    }

    /// 从累积缓冲头部弹出一个帧并精确前移缓冲
    pub fn decode_buf(buf: &mut BytesMut) -> Result<Option<Frame>> {
        match Frame::decode(&buf[..])? {
            Some((frame, consumed)) => {
                buf.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}
