/// 端到端拼接流程测试：假中继 + 假真实服务 + 完整客户端栈
mod common;

use bytes::Bytes;
use common::{read_frame, read_frame_of_type, with_timeout, write_frame};
use lan_tunnel::client::control::ControlStrategy;
use lan_tunnel::{ChannelPool, ConnHandler, Frame, FrameType, PoolConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct Harness {
    relay: TcpListener,
    control_srv: TcpStream,
    service: TcpListener,
    service_addr: String,
    pool: Arc<ChannelPool>,
}

/// 搭建完整客户端：控制通道已建立并完成 AUTH 交换
async fn start_client(client_key: &str) -> Harness {
    let relay = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_addr = relay.local_addr().unwrap().to_string();
    let service = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let service_addr = service.local_addr().unwrap().to_string();

    let pool = ChannelPool::new(
        &relay_addr,
        PoolConfig {
            capacity: 4,
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        },
    );

    let control_client = TcpStream::connect(&relay_addr).await.unwrap();
    let (mut control_srv, _) = relay.accept().await.unwrap();

    let (handler, reader) = ConnHandler::new(control_client);
    let strategy = Arc::new(ControlStrategy::new(
        client_key,
        Arc::clone(&pool),
        Duration::from_secs(5),
    ));
    tokio::spawn(handler.listen(reader, strategy));

    // 控制通道建立后客户端应立即乐观发送 AUTH
    let auth = with_timeout(read_frame(&mut control_srv)).await;
    assert_eq!(auth.frame_type, FrameType::Auth);
    assert_eq!(auth.uri, client_key);

    Harness {
        relay,
        control_srv,
        service,
        service_addr,
        pool,
    }
}

/// 下发 CONNECT 并完成拼接，返回（真实服务侧连接，中继数据通道侧连接）
async fn establish_session(h: &mut Harness, session: &str, key: &str) -> (TcpStream, TcpStream) {
    let connect = Frame {
        frame_type: FrameType::Connect,
        serial_number: 0,
        uri: session.to_string(),
        data: Bytes::from(h.service_addr.clone()),
    };
    write_frame(&mut h.control_srv, &connect).await;

    // 客户端拨号真实服务，并按需新建一条数据通道
    let (service_srv, _) = with_timeout(h.service.accept()).await.unwrap();
    let (mut data_srv, _) = with_timeout(h.relay.accept()).await.unwrap();

    // 数据通道上宣告该通道现在服务于哪个会话
    let announce = with_timeout(read_frame_of_type(&mut data_srv, FrameType::Connect)).await;
    assert_eq!(announce.uri, format!("{}@{}", session, key));

    (service_srv, data_srv)
}

async fn wait_for_idle(pool: &Arc<ChannelPool>, expected: usize) {
    with_timeout(async {
        while pool.idle_len() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn test_connect_splices_and_wraps_service_bytes() {
    let mut h = start_client("mykey").await;
    let (mut service_srv, mut data_srv) = establish_session(&mut h, "session1", "mykey").await;

    // 真实服务发出的字节应包装成 TRANSFER 帧出现在数据通道上
    service_srv.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
    let transfer = with_timeout(read_frame_of_type(&mut data_srv, FrameType::Transfer)).await;
    assert_eq!(transfer.uri, "");
    assert_eq!(&transfer.data[..], b"GET / HTTP/1.1\r\n");

    // 反方向：TRANSFER 帧拆包后原样写给真实服务
    let reply = Frame::transfer(Bytes::from_static(b"HTTP/1.1 200 OK\r\n"));
    write_frame(&mut data_srv, &reply).await;
    let mut buf = [0u8; 17];
    with_timeout(service_srv.read_exact(&mut buf)).await.unwrap();
    assert_eq!(&buf, b"HTTP/1.1 200 OK\r\n");
}

#[tokio::test]
async fn test_local_close_sends_disconnect_and_recycles_channel() {
    let mut h = start_client("mykey").await;
    let (service_srv, mut data_srv) = establish_session(&mut h, "session1", "mykey").await;

    // 真实服务侧断开，客户端应在数据通道上发 DISCONNECT 并回收通道
    drop(service_srv);
    let disconnect = with_timeout(read_frame_of_type(&mut data_srv, FrameType::Disconnect)).await;
    assert_eq!(disconnect.uri, "session1");

    wait_for_idle(&h.pool, 1).await;
}

#[tokio::test]
async fn test_relay_disconnect_closes_local_and_recycles_channel() {
    let mut h = start_client("mykey").await;
    let (mut service_srv, mut data_srv) = establish_session(&mut h, "session1", "mykey").await;

    // 中继宣布会话结束，真实服务连接应被关闭
    write_frame(&mut data_srv, &Frame::with_uri(FrameType::Disconnect, "session1")).await;

    let mut buf = [0u8; 1];
    let n = with_timeout(service_srv.read(&mut buf)).await.unwrap();
    assert_eq!(n, 0, "local service connection should be closed");

    wait_for_idle(&h.pool, 1).await;
}

#[tokio::test]
async fn test_dial_failure_reports_disconnect_upstream() {
    let mut h = start_client("mykey").await;

    // 指向一个必然拒绝连接的地址
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap().to_string();
    drop(dead);

    let connect = Frame {
        frame_type: FrameType::Connect,
        serial_number: 0,
        uri: "session2".to_string(),
        data: Bytes::from(dead_addr),
    };
    write_frame(&mut h.control_srv, &connect).await;

    let disconnect =
        with_timeout(read_frame_of_type(&mut h.control_srv, FrameType::Disconnect)).await;
    assert_eq!(disconnect.uri, "session2");
}

#[tokio::test]
async fn test_channel_creation_failure_disconnects_session() {
    let mut h = start_client("mykey").await;

    // 把池指向已关闭的地址，借出数据通道必然失败
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap().to_string();
    drop(dead);
    let broken_pool = ChannelPool::new(
        &dead_addr,
        PoolConfig {
            capacity: 4,
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(1),
        },
    );

    // 重建控制通道，绑定到坏掉的池
    let relay_addr = h.relay.local_addr().unwrap().to_string();
    let control_client = TcpStream::connect(&relay_addr).await.unwrap();
    let (mut control_srv, _) = h.relay.accept().await.unwrap();
    let (handler, reader) = ConnHandler::new(control_client);
    let strategy = Arc::new(ControlStrategy::new(
        "mykey",
        broken_pool,
        Duration::from_secs(5),
    ));
    tokio::spawn(handler.listen(reader, strategy));
    let _auth = with_timeout(read_frame(&mut control_srv)).await;

    let connect = Frame {
        frame_type: FrameType::Connect,
        serial_number: 0,
        uri: "session3".to_string(),
        data: Bytes::from(h.service_addr.clone()),
    };
    write_frame(&mut control_srv, &connect).await;

    // 真实服务连上后因借不到通道被立刻关闭
    let (mut service_srv, _) = with_timeout(h.service.accept()).await.unwrap();

    // 借不到数据通道时应在控制通道上报 DISCONNECT
    let disconnect =
        with_timeout(read_frame_of_type(&mut control_srv, FrameType::Disconnect)).await;
    assert_eq!(disconnect.uri, "session3");

    let mut buf = [0u8; 1];
    let n = with_timeout(service_srv.read(&mut buf)).await.unwrap();
    assert_eq!(n, 0, "local service connection should be closed");
}

#[tokio::test]
async fn test_control_channel_heartbeat_flows() {
    let mut h = start_client("mykey").await;

    // 控制通道心跳周期为 5 秒，放宽超时等第一个心跳
    let heartbeat = tokio::time::timeout(
        Duration::from_secs(8),
        read_frame_of_type(&mut h.control_srv, FrameType::Heartbeat),
    )
    .await
    .expect("no heartbeat within 8s");
    assert_eq!(heartbeat.frame_type, FrameType::Heartbeat);
}
