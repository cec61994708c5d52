/// 真实服务连接的消息策略
///
/// 绑定到一个会话（userId）：连接建立后从池中借出数据通道并
/// 互相拼接，真实服务发来的字节按原样视为载荷，包成 TRANSFER
/// 帧经数据通道送往中继；本侧断开时向对端发 DISCONNECT 并拆链
use crate::connection_pool::ChannelPool;
use crate::error::Result;
use crate::handler::{ConnHandler, Inbound, MessageStrategy};
use crate::protocol::{Frame, FrameType};
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct LocalServiceStrategy {
    /// 会话标识，来自控制通道 CONNECT 帧的 uri
    user_id: String,
    client_key: String,

    /// 控制通道处理器，借不到数据通道时向上游报告断开
    control_conn: Arc<ConnHandler>,
    pool: Arc<ChannelPool>,
}

impl LocalServiceStrategy {
    pub fn new(
        user_id: impl Into<String>,
        client_key: impl Into<String>,
        control_conn: Arc<ConnHandler>,
        pool: Arc<ChannelPool>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            client_key: client_key.into(),
            control_conn,
            pool,
        }
    }
}

#[async_trait]
impl MessageStrategy for LocalServiceStrategy {
    /// 真实服务方向没有内部分帧，一次读取就是一条消息
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<Inbound>> {
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(Inbound::Chunk(buf.split().freeze())))
    }

    /// 真实服务拨号成功：借出数据通道、建立拼接，
    /// 并在通道上宣告本通道现在服务于哪个会话
    async fn on_connect_success(&self, conn: &Arc<ConnHandler>) -> Result<()> {
        let channel = match self.pool.get().await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(
                    "No data channel available for session {}: {}",
                    self.user_id, e
                );
                let disconnect = Frame::with_uri(FrameType::Disconnect, self.user_id.as_str());
                let _ = self.control_conn.send_frame(&disconnect).await;
                return Err(e);
            }
        };

        ConnHandler::link(&channel, conn);

        let announce = Frame::with_uri(
            FrameType::Connect,
            format!("{}@{}", self.user_id, self.client_key),
        );
        channel.send_frame(&announce).await?;
        info!(
            "Local service connected for session {}, announced on data channel",
            self.user_id
        );
        Ok(())
    }

    async fn on_message(&self, conn: &Arc<ConnHandler>, msg: Inbound) -> Result<()> {
        let Inbound::Chunk(data) = msg else {
            return Ok(());
        };
        if let Some(peer) = conn.peer() {
            peer.send_frame(&Frame::transfer(data)).await?;
        }
        Ok(())
    }

    /// 真实服务侧断开：通知对端会话结束，拆链后把仍然健康的
    /// 数据通道归还连接池
    async fn on_connect_error(&self, conn: &Arc<ConnHandler>) {
        if let Some(peer) = conn.unlink() {
            debug!("Session {} ended, notifying relay", self.user_id);
            let disconnect = Frame::with_uri(FrameType::Disconnect, self.user_id.as_str());
            let _ = peer.send_frame(&disconnect).await;
            self.pool.release(peer).await;
        }
    }
}
