/// 数据通道连接池
///
/// 维护一组预先建立、处于空闲状态的到中继服务器的数据通道，
/// 借出时优先复用最近归还的连接（LIFO），空闲期间由每连接的
/// 心跳任务做活性维护，读静默超过两个心跳周期即判死并关闭
use crate::client::data_channel::DataChannelStrategy;
use crate::error::{Result, TunnelError};
use crate::handler::ConnHandler;
use crate::protocol::{Frame, FrameType};
use socket2::{SockRef, TcpKeepalive};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// TCP keepalive 首次探测时间
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// TCP keepalive 探测间隔
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// 连接池配置
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 空闲通道数上限，归还时超出即关闭丢弃
    pub capacity: usize,

    /// 空闲心跳周期，读静默 ≥ 2 倍周期判定连接已死
    pub heartbeat_interval: Duration,

    /// 新建通道的拨号超时
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// 池中的一个空闲通道及其心跳任务句柄
struct IdleEntry {
    handler: Arc<ConnHandler>,
    hb_token: CancellationToken,
}

/// 数据通道连接池
pub struct ChannelPool {
    /// 中继服务器地址
    relay_addr: String,
    config: PoolConfig,

    /// 空闲集合，单锁保护，锁内不做任何 I/O
    idle: parking_lot::Mutex<Vec<IdleEntry>>,
}

impl ChannelPool {
    /// 创建空的连接池
    pub fn new(relay_addr: impl Into<String>, config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            relay_addr: relay_addr.into(),
            config,
            idle: parking_lot::Mutex::new(Vec::new()),
        });
        debug!(
            "Initialized channel pool for {} (capacity {})",
            pool.relay_addr, pool.config.capacity
        );
        pool
    }

    /// 借出一个可用的数据通道
    ///
    /// 从空闲集合弹出最近归还的通道并检查活性，死连接直接丢弃继续扫描；
    /// 集合为空则新建一条通道直接返回。新建在锁外进行，并发借出时
    /// 可能多建几条连接，只多不少，属于无害竞争。
    /// 仅在新建通道失败时返回错误。
    pub async fn get(self: &Arc<Self>) -> Result<Arc<ConnHandler>> {
        loop {
            let entry = self.idle.lock().pop();
            match entry {
                Some(entry) => {
                    // 离开空闲集合的瞬间停掉心跳任务
                    entry.hb_token.cancel();
                    if entry.handler.is_active() {
                        debug!(
                            "Reusing pooled channel to {}",
                            entry.handler.peer_addr()
                        );
                        return Ok(entry.handler);
                    }
                    debug!("Discarding dead pooled channel");
                }
                None => return self.create_channel().await,
            }
        }
    }

    /// 归还一个数据通道
    ///
    /// 已失效或重复归还的通道直接丢弃；集合已满时关闭多余连接；
    /// 否则入池并启动空闲心跳
    pub async fn release(self: &Arc<Self>, handler: Arc<ConnHandler>) {
        if !handler.is_active() {
            debug!("Dropping dead channel instead of pooling it");
            return;
        }

        let hb_token = CancellationToken::new();
        {
            let mut idle = self.idle.lock();
            if idle
                .iter()
                .any(|e| Arc::ptr_eq(&e.handler, &handler))
            {
                return;
            }
            if idle.len() >= self.config.capacity {
                drop(idle);
                debug!(
                    "Pool is full, closing returned channel to {}",
                    handler.peer_addr()
                );
                handler.close();
                return;
            }
            idle.push(IdleEntry {
                handler: Arc::clone(&handler),
                hb_token: hb_token.clone(),
            });
        }

        // 入池前若已有一整个周期没写过，先补一个心跳
        let interval_secs = self.config.heartbeat_interval.as_secs() as i64;
        if handler.secs_since_write() >= interval_secs {
            let _ = handler.send_frame(&Frame::new(FrameType::Heartbeat)).await;
        }

        self.spawn_heartbeat(handler, hb_token);
    }

    /// 当前空闲通道数
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    /// 新建一条到中继的数据通道并启动其读循环
    ///
    /// 数据通道不发送 AUTH，它被视为同一中继会话下的可信成员
    async fn create_channel(self: &Arc<Self>) -> Result<Arc<ConnHandler>> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.relay_addr),
        )
        .await
        .map_err(|_| TunnelError::ConnectTimeout {
            addr: self.relay_addr.clone(),
            duration: self.config.connect_timeout,
        })?
        .map_err(|e| TunnelError::connection_failed(&self.relay_addr, e))?;

        apply_keepalive(&stream);

        let (handler, reader) = ConnHandler::new(stream);
        let strategy = Arc::new(DataChannelStrategy::new(Arc::clone(self)));
        tokio::spawn(Arc::clone(&handler).listen(reader, strategy));

        debug!("Created new data channel to {}", self.relay_addr);
        Ok(handler)
    }

    /// 空闲通道的周期心跳任务
    ///
    /// 每个周期检查读活性，静默超过两个周期就关闭连接，
    /// 留给下一次 `get` 扫描时丢弃；刚写过的周期跳过发送
    fn spawn_heartbeat(&self, handler: Arc<ConnHandler>, token: CancellationToken) {
        let interval = self.config.heartbeat_interval;
        let interval_secs = interval.as_secs() as i64;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Stopped idle heartbeat for {}", handler.peer_addr());
                        return;
                    }
                    _ = ticker.tick() => {
                        if !handler.is_active() {
                            return;
                        }
                        if handler.secs_since_read() >= 2 * interval_secs {
                            warn!(
                                "Idle channel to {} timed out, closing",
                                handler.peer_addr()
                            );
                            handler.close();
                            return;
                        }
                        if handler.secs_since_write() < interval_secs {
                            continue;
                        }
                        if handler
                            .send_frame(&Frame::new(FrameType::Heartbeat))
                            .await
                            .is_err()
                        {
                            handler.close();
                            return;
                        }
                    }
                }
            }
        });
    }
}

/// 给中继方向的 socket 打开 TCP keepalive
fn apply_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);

    let sock_ref = SockRef::from(stream);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(
            "Failed to set TCP keepalive on {}: {}",
            stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".into()),
            e
        );
    }
}
