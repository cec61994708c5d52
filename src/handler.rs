/// 连接处理器
///
/// 每个物理 TCP 连接对应一个 ConnHandler：运行读取/解码/分发循环，
/// 维护与拼接对端的互相引用，并通过内部写锁串行化并发写入，
/// 避免心跳任务与数据转发在同一 socket 上交错出半截帧。
use crate::error::{Result, TunnelError};
use crate::protocol::Frame;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 未解码数据的缓冲上限，超过即强制断开，
/// 防止对端发送超大帧或永不完整的帧耗尽内存
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// 单次读取的缓冲块大小
pub const READ_CHUNK: usize = 8 * 1024;

/// 读循环分发给策略的单条消息
#[derive(Debug)]
pub enum Inbound {
    /// 一个完整的协议帧（控制通道、数据通道）
    Frame(Frame),

    /// 不透明的原始字节块（真实服务侧，无内部分帧）
    Chunk(Bytes),
}

/// 消息处理策略
///
/// 控制通道、数据通道与真实服务连接共用同一套读循环，
/// 差异全部收敛在策略实现里，连接创建时绑定，运行期不再切换
#[async_trait]
pub trait MessageStrategy: Send + Sync + 'static {
    /// 从累积缓冲中取出一条消息，数据不足返回 `Ok(None)`
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<Inbound>>;

    /// 连接就绪（socket 建立、读循环即将开始）
    async fn on_connect_success(&self, conn: &Arc<ConnHandler>) -> Result<()>;

    /// 收到一条完整消息
    async fn on_message(&self, conn: &Arc<ConnHandler>, msg: Inbound) -> Result<()>;

    /// 连接出错或关闭，读循环退出前的唯一清理路径
    async fn on_connect_error(&self, conn: &Arc<ConnHandler>);
}

/// 连接处理器，持有一个物理连接的写半部与拼接状态
pub struct ConnHandler {
    /// 对端地址，仅用于日志
    peer_addr: String,

    /// socket 是否仍然可用
    active: AtomicBool,

    /// 写半部，互斥锁保证帧级别的写原子性
    writer: tokio::sync::Mutex<OwnedWriteHalf>,

    /// 拼接对端：要么双方都为空，要么互相指向对方
    peer: parking_lot::Mutex<Option<Arc<ConnHandler>>>,

    /// 最近一次读到字节的时间（Unix 秒），连接池活性检查使用
    last_read_at: AtomicI64,

    /// 最近一次写出字节的时间（Unix 秒）
    last_write_at: AtomicI64,

    /// 取消信号，close() 通过它终止读循环
    shutdown: CancellationToken,
}

impl ConnHandler {
    /// 由已建立的 TCP 连接创建处理器，返回读半部交给 `listen`
    pub fn new(stream: TcpStream) -> (Arc<Self>, OwnedReadHalf) {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (reader, writer) = stream.into_split();
        let now = unix_now();

        let handler = Arc::new(Self {
            peer_addr,
            active: AtomicBool::new(true),
            writer: tokio::sync::Mutex::new(writer),
            peer: parking_lot::Mutex::new(None),
            last_read_at: AtomicI64::new(now),
            last_write_at: AtomicI64::new(now),
            shutdown: CancellationToken::new(),
        });
        (handler, reader)
    }

    /// 读取/解码/分发主循环，直到连接出错或被关闭
    ///
    /// 同一连接上的消息严格按到达顺序分发；解码错误和分发错误
    /// 不会击穿进程，统一按连接错误处理，走唯一的清理路径退出
    pub async fn listen(self: Arc<Self>, mut reader: OwnedReadHalf, strategy: Arc<dyn MessageStrategy>) {
        self.active.store(true, Ordering::SeqCst);

        if let Err(e) = strategy.on_connect_success(&self).await {
            debug!("Connection setup failed for {}: {}", self.peer_addr, e);
            self.teardown(&strategy).await;
            return;
        }

        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            if buf.len() > MAX_READ_BUFFER {
                warn!(
                    "Read buffer exceeded {} bytes on {}, closing connection",
                    MAX_READ_BUFFER, self.peer_addr
                );
                break;
            }

            buf.reserve(READ_CHUNK);
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Connection to {} closed locally", self.peer_addr);
                    break;
                }
                res = reader.read_buf(&mut buf) => res,
            };

            match read {
                Ok(0) => {
                    debug!("Peer {} closed the connection", self.peer_addr);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Read error on {}: {}", self.peer_addr, e);
                    break;
                }
            }
            self.last_read_at.store(unix_now(), Ordering::Relaxed);

            if let Err(e) = self.dispatch(&mut buf, &strategy).await {
                warn!("Dispatch error on {}: {}", self.peer_addr, e);
                break;
            }

            // 把剩余的未消费字节挪进按需分配的新缓冲，
            // 避免长期持有一块消费过半的大缓冲
            if !buf.is_empty() {
                let mut fresh = BytesMut::with_capacity(buf.len() + READ_CHUNK);
                fresh.extend_from_slice(&buf);
                buf = fresh;
            } else {
                buf = BytesMut::with_capacity(READ_CHUNK);
            }
        }

        self.teardown(&strategy).await;
    }

    /// 内层解码循环：持续取帧分发，直到数据不足或缓冲耗尽
    async fn dispatch(
        self: &Arc<Self>,
        buf: &mut BytesMut,
        strategy: &Arc<dyn MessageStrategy>,
    ) -> Result<()> {
        while let Some(msg) = strategy.decode(buf)? {
            strategy.on_message(self, msg).await?;
            if buf.is_empty() {
                break;
            }
        }
        Ok(())
    }

    /// 唯一的拆除路径：标记失效、通知策略、关闭写半部
    async fn teardown(self: &Arc<Self>, strategy: &Arc<dyn MessageStrategy>) {
        self.active.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        strategy.on_connect_error(self).await;
        let _ = self.writer.lock().await.shutdown().await;
    }

    /// 编码并同步写出一个协议帧
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let encoded = frame.encode()?;
        self.write_all(&encoded).await
    }

    /// 原样写出字节，不加任何分帧（真实服务方向）
    pub async fn send_raw(&self, data: &[u8]) -> Result<()> {
        self.write_all(data).await
    }

    async fn write_all(&self, data: &[u8]) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(TunnelError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        self.last_write_at.store(unix_now(), Ordering::Relaxed);
        Ok(())
    }

    /// 关闭连接，可从任意任务调用（对端拆除、池活性检查）
    pub fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    /// socket 是否仍然可用
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 将两个处理器互相链接为拼接对
    pub fn link(a: &Arc<ConnHandler>, b: &Arc<ConnHandler>) {
        *a.peer.lock() = Some(Arc::clone(b));
        *b.peer.lock() = Some(Arc::clone(a));
    }

    /// 当前拼接对端
    pub fn peer(&self) -> Option<Arc<ConnHandler>> {
        self.peer.lock().clone()
    }

    /// 摘除拼接链接并返回对端
    ///
    /// 同时清除对端指回来的引用，保证不会残留单向链接。
    /// 两把锁顺序获取而非嵌套持有，双方并发拆除不会死锁
    pub fn unlink(self: &Arc<Self>) -> Option<Arc<ConnHandler>> {
        let peer = self.peer.lock().take()?;
        {
            let mut back = peer.peer.lock();
            if back.as_ref().is_some_and(|p| Arc::ptr_eq(p, self)) {
                *back = None;
            }
        }
        Some(peer)
    }

    /// 距最近一次读的秒数
    pub fn secs_since_read(&self) -> i64 {
        unix_now() - self.last_read_at.load(Ordering::Relaxed)
    }

    /// 距最近一次写的秒数
    pub fn secs_since_write(&self) -> i64 {
        unix_now() - self.last_write_at.load(Ordering::Relaxed)
    }

    /// 对端地址（日志用）
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
