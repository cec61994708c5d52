/// 控制通道的消息策略
///
/// 控制通道是客户端到中继唯一的长连接：连接建立后乐观发送 AUTH
/// （不等待应答），中继下发 CONNECT 时异步拨号真实服务并为其
/// 启动新的连接处理器，同时维持一个固定周期的心跳任务
use crate::connection_pool::ChannelPool;
use crate::error::Result;
use crate::handler::{ConnHandler, Inbound, MessageStrategy};
use crate::protocol::{Frame, FrameType};
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::local_service::LocalServiceStrategy;

/// 控制通道心跳周期
const CONTROL_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

pub struct ControlStrategy {
    /// 客户端密钥，为空则跳过认证
    client_key: String,
    pool: Arc<ChannelPool>,

    /// 拨号真实服务的超时
    connect_timeout: Duration,

    /// 心跳任务句柄，连接出错时取消
    heartbeat: parking_lot::Mutex<Option<CancellationToken>>,
}

impl ControlStrategy {
    pub fn new(
        client_key: impl Into<String>,
        pool: Arc<ChannelPool>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            client_key: client_key.into(),
            pool,
            connect_timeout,
            heartbeat: parking_lot::Mutex::new(None),
        }
    }

    /// 启动控制通道心跳任务，心跳发送失败视为连接已断
    fn start_heartbeat(&self, conn: Arc<ConnHandler>) {
        let token = CancellationToken::new();
        if let Some(old) = self.heartbeat.lock().replace(token.clone()) {
            old.cancel();
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CONTROL_HEARTBEAT_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Control heartbeat stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if conn
                            .send_frame(&Frame::new(FrameType::Heartbeat))
                            .await
                            .is_err()
                        {
                            debug!("Control heartbeat failed, connection is gone");
                            return;
                        }
                    }
                }
            }
        });
    }

    /// 处理中继下发的会话建立请求：异步拨号真实服务，
    /// 成功则以真实服务策略启动读循环，失败立即回报 DISCONNECT
    fn handle_connect(&self, control_conn: &Arc<ConnHandler>, frame: Frame) {
        let session_id = frame.uri;
        let target = String::from_utf8_lossy(&frame.data).to_string();
        info!("Received connect for session {} => {}", session_id, target);

        let strategy = Arc::new(LocalServiceStrategy::new(
            session_id.clone(),
            self.client_key.clone(),
            Arc::clone(control_conn),
            Arc::clone(&self.pool),
        ));
        let control_conn = Arc::clone(control_conn);
        let connect_timeout = self.connect_timeout;

        tokio::spawn(async move {
            let dialed = tokio::time::timeout(connect_timeout, TcpStream::connect(&target)).await;
            match dialed {
                Ok(Ok(stream)) => {
                    let (handler, reader) = ConnHandler::new(stream);
                    handler.listen(reader, strategy).await;
                }
                Ok(Err(e)) => {
                    warn!("Failed to dial local service {}: {}", target, e);
                    let disconnect = Frame::with_uri(FrameType::Disconnect, session_id);
                    let _ = control_conn.send_frame(&disconnect).await;
                }
                Err(_) => {
                    warn!("Timed out dialing local service {}", target);
                    let disconnect = Frame::with_uri(FrameType::Disconnect, session_id);
                    let _ = control_conn.send_frame(&disconnect).await;
                }
            }
        });
    }
}

#[async_trait]
impl MessageStrategy for ControlStrategy {
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<Inbound>> {
        Ok(Frame::decode_buf(buf)?.map(Inbound::Frame))
    }

    /// 连接就绪：配置了密钥就立即发送 AUTH（乐观认证，不等应答），
    /// 然后启动心跳
    async fn on_connect_success(&self, conn: &Arc<ConnHandler>) -> Result<()> {
        if !self.client_key.is_empty() {
            let auth = Frame::with_uri(FrameType::Auth, self.client_key.as_str());
            conn.send_frame(&auth).await?;
            debug!("Sent auth frame");
        }
        self.start_heartbeat(Arc::clone(conn));
        Ok(())
    }

    async fn on_message(&self, conn: &Arc<ConnHandler>, msg: Inbound) -> Result<()> {
        let Inbound::Frame(frame) = msg else {
            return Ok(());
        };
        match frame.frame_type {
            FrameType::Connect => self.handle_connect(conn, frame),
            FrameType::Transfer => {
                if let Some(peer) = conn.peer() {
                    if let Err(e) = peer.send_raw(&frame.data).await {
                        debug!("Failed to forward transfer payload: {}", e);
                    }
                }
            }
            FrameType::Disconnect => {
                if let Some(peer) = conn.unlink() {
                    peer.close();
                }
            }
            // 心跳等其余类型只是传输层保活，无需应答
            _ => {}
        }
        Ok(())
    }

    /// 控制通道断开：停掉心跳，重连由外层引导循环负责
    async fn on_connect_error(&self, _conn: &Arc<ConnHandler>) {
        if let Some(token) = self.heartbeat.lock().take() {
            token.cancel();
        }
    }
}
