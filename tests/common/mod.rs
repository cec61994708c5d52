#![allow(dead_code)]
/// 集成测试公共设施：帧读写辅助与事件记录策略
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lan_tunnel::{ConnHandler, Frame, FrameType, Inbound, MessageStrategy};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// 给测试中的等待操作加统一超时，避免挂死
pub async fn with_timeout<F, T>(fut: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("test operation timed out")
}

/// 从流中读出一个完整帧（阻塞到帧完整）
pub async fn read_frame(stream: &mut TcpStream) -> Frame {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let body_len = u32::from_be_bytes(len_buf) as usize;

    let mut full = vec![0u8; 4 + body_len];
    full[..4].copy_from_slice(&len_buf);
    stream.read_exact(&mut full[4..]).await.unwrap();

    let (frame, consumed) = Frame::decode(&full).unwrap().unwrap();
    assert_eq!(consumed, full.len());
    frame
}

/// 读帧直到遇到指定类型，途中出现的心跳直接跳过
pub async fn read_frame_of_type(stream: &mut TcpStream, frame_type: FrameType) -> Frame {
    loop {
        let frame = read_frame(stream).await;
        if frame.frame_type == frame_type {
            return frame;
        }
        assert_eq!(
            frame.frame_type,
            FrameType::Heartbeat,
            "unexpected frame while waiting for {:?}",
            frame_type
        );
    }
}

/// 把帧编码后写入流
pub async fn write_frame(stream: &mut TcpStream, frame: &Frame) {
    stream.write_all(&frame.encode().unwrap()).await.unwrap();
}

/// 策略回调产生的事件
#[derive(Debug)]
pub enum Event {
    ConnectSuccess,
    Frame(Frame),
    Chunk(Bytes),
    ConnectError,
}

/// 把回调转成事件流的测试策略，按协议帧解码
pub struct RecordingStrategy {
    tx: mpsc::UnboundedSender<Event>,
}

impl RecordingStrategy {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl MessageStrategy for RecordingStrategy {
    fn decode(&self, buf: &mut BytesMut) -> lan_tunnel::Result<Option<Inbound>> {
        Ok(Frame::decode_buf(buf)?.map(Inbound::Frame))
    }

    async fn on_connect_success(&self, _conn: &Arc<ConnHandler>) -> lan_tunnel::Result<()> {
        let _ = self.tx.send(Event::ConnectSuccess);
        Ok(())
    }

    async fn on_message(&self, _conn: &Arc<ConnHandler>, msg: Inbound) -> lan_tunnel::Result<()> {
        let event = match msg {
            Inbound::Frame(frame) => Event::Frame(frame),
            Inbound::Chunk(data) => Event::Chunk(data),
        };
        let _ = self.tx.send(event);
        Ok(())
    }

    async fn on_connect_error(&self, _conn: &Arc<ConnHandler>) {
        let _ = self.tx.send(Event::ConnectError);
    }
}
