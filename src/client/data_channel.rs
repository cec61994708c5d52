/// 池化数据通道的消息策略
///
/// 数据通道承载一个拼接会话的 TRANSFER 载荷：收到的帧拆包后
/// 原样写给真实服务连接，会话断开时把自己交还连接池。
/// 数据通道不发送 AUTH，它是同一中继会话下的隐式可信成员
use crate::connection_pool::ChannelPool;
use crate::error::Result;
use crate::handler::{ConnHandler, Inbound, MessageStrategy};
use crate::protocol::{Frame, FrameType};
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use tracing::debug;

pub struct DataChannelStrategy {
    pool: Arc<ChannelPool>,
}

impl DataChannelStrategy {
    pub fn new(pool: Arc<ChannelPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStrategy for DataChannelStrategy {
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<Inbound>> {
        Ok(Frame::decode_buf(buf)?.map(Inbound::Frame))
    }

    async fn on_connect_success(&self, _conn: &Arc<ConnHandler>) -> Result<()> {
        Ok(())
    }

    async fn on_message(&self, conn: &Arc<ConnHandler>, msg: Inbound) -> Result<()> {
        let Inbound::Frame(frame) = msg else {
            return Ok(());
        };
        match frame.frame_type {
            FrameType::Transfer => {
                // 拆包转发；对端若已死由它自己的读循环负责善后
                if let Some(peer) = conn.peer() {
                    if let Err(e) = peer.send_raw(&frame.data).await {
                        debug!("Failed to forward transfer payload: {}", e);
                    }
                }
            }
            FrameType::Disconnect => {
                debug!("Session {} disconnected by relay", frame.uri);
                if let Some(peer) = conn.unlink() {
                    peer.close();
                }
                // 会话结束，通道归还空闲集合
                self.pool.release(Arc::clone(conn)).await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_connect_error(&self, conn: &Arc<ConnHandler>) {
        // 通道自身死亡时连带关闭拼接的真实服务连接
        if let Some(peer) = conn.unlink() {
            peer.close();
        }
    }
}
