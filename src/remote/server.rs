use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::remote::protocol::{Reply, Request};
use crate::state::{forks, ArbitrationState, Status, StatusTable};

struct Seats {
    table: ArbitrationState,
    // 席ごとに登録中のコネクション
    owners: Vec<Option<u64>>,
    served: u64,
}

struct Shared {
    // await をまたいで保持しないので std の Mutex で十分
    seats: Mutex<Seats>,
    // 席ごとの通知。許可された哲学者のタスクだけを起こす
    wake: Vec<Notify>,
}

// コネクションごとの状態
struct Session {
    conn: u64,
    id: Option<usize>,
    // TOMAR の待機中に届いた次のコマンド。OK を返した後で処理する
    pending: Option<String>,
}

// TOMAR の処理結果
enum Step {
    Reply(Reply),
    Disconnected,
}

// コーディネータ
// 状態テーブルを 1 つ持ち、接続した哲学者ごとにタスクを 1 つ動かす
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    pub fn new(n: usize) -> Result<Self> {
        let table = ArbitrationState::new(n)?;
        Ok(Server {
            shared: Arc::new(Shared {
                seats: Mutex::new(Seats {
                    table,
                    owners: vec![None; n],
                    served: 0,
                }),
                wake: (0..n).map(|_| Notify::new()).collect(),
            }),
        })
    }

    pub fn snapshot(&self) -> ArbitrationState {
        self.shared.seats.lock().unwrap().table.clone()
    }

    pub fn served(&self) -> u64 {
        self.shared.seats.lock().unwrap().served
    }

    // stop が完了するまでコネクションを受け付ける
    pub async fn run(self, listener: TcpListener, stop: impl Future<Output = ()>) -> io::Result<()> {
        tokio::pin!(stop);
        let mut next_conn = 0;
        info!(addr = %listener.local_addr()?, "coordinator listening");

        loop {
            tokio::select! {
                _ = &mut stop => break,
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    info!(%addr, "accept");
                    next_conn += 1;
                    let shared = self.shared.clone();
                    let conn = next_conn;
                    // コネクションごとにタスクを作成
                    tokio::spawn(async move {
                        if let Err(e) = shared.serve(stream, conn).await {
                            warn!(%addr, error = %e, "connection failed");
                        }
                        info!(%addr, "close");
                    });
                }
            }
        }
        Ok(())
    }

    // 終了時の統計
    pub fn log_stats(&self) {
        let seats = self.shared.seats.lock().unwrap();
        info!(served = seats.served, "coordinator statistics");
        for (id, status) in seats.table.statuses().iter().enumerate() {
            info!(id, %status, "final state");
        }
    }
}

impl Shared {
    async fn serve(&self, stream: TcpStream, conn: u64) -> io::Result<()> {
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut session = Session {
            conn,
            id: None,
            pending: None,
        };

        let result = loop {
            let line = match session.pending.take() {
                Some(line) => line,
                None => match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
            };

            let reply = match line.parse::<Request>() {
                Ok(request) => match self.dispatch(&mut session, request, &mut lines).await {
                    Step::Reply(reply) => reply,
                    Step::Disconnected => break Ok(()),
                },
                // 不正なコマンドでもコネクションは維持する
                Err(e) => Reply::Error(e.to_string()),
            };

            let reply = format!("{reply}\n");
            if let Err(e) = writer.write_all(reply.as_bytes()).await {
                break Err(e);
            }
        };

        if let Some(id) = session.id {
            self.disconnect(id, session.conn);
        }
        result
    }

    async fn dispatch(
        &self,
        session: &mut Session,
        request: Request,
        lines: &mut Lines<BufReader<OwnedReadHalf>>,
    ) -> Step {
        let reply = match request {
            Request::Ping => Reply::Pong,
            Request::Register(id) => self.register(session, id),
            Request::Take(id) => match self.registered(session, id) {
                Ok(()) => return self.take(session, id, lines).await,
                Err(reply) => reply,
            },
            Request::Release(id) => match self.registered(session, id) {
                Ok(()) => {
                    self.release(id);
                    Reply::Ok
                }
                Err(reply) => reply,
            },
        };
        Step::Reply(reply)
    }

    fn register(&self, session: &mut Session, id: usize) -> Reply {
        let mut seats = self.seats.lock().unwrap();
        if let Err(e) = seats.table.check_id(id) {
            return Reply::Error(e.to_string());
        }
        match session.id {
            Some(current) if current == id => return Reply::Ok,
            Some(current) => {
                return Reply::Error(format!(
                    "connection is already registered as philosopher {current}"
                ))
            }
            None => {}
        }
        if seats.owners[id].is_some() {
            return Reply::Error(format!("philosopher {id} is already registered"));
        }
        seats.owners[id] = Some(session.conn);
        session.id = Some(id);
        info!(id, "philosopher connected from a separate process");
        Reply::Ok
    }

    fn registered(&self, session: &Session, id: usize) -> Result<(), Reply> {
        match session.id {
            Some(current) if current == id => Ok(()),
            Some(current) => Err(Reply::Error(format!(
                "connection is registered as philosopher {current}, not {id}"
            ))),
            None => Err(Reply::Error(format!("philosopher {id} has not registered"))),
        }
    }

    // 許可されるまで応答を返さない
    async fn take(
        &self,
        session: &mut Session,
        id: usize,
        lines: &mut Lines<BufReader<OwnedReadHalf>>,
    ) -> Step {
        {
            let mut seats = self.seats.lock().unwrap();
            if let Err(e) = seats.table.hunger(id) {
                return Step::Reply(Reply::Error(e.to_string()));
            }
            let [left, right] = forks(id, seats.table.len());
            debug!(id, left, right, "philosopher asks for forks");
            if !seats.table.admit(id) {
                debug!(id, "blocked waiting for forks");
            }
        }

        loop {
            if self.admitted(id) {
                debug!(id, "philosopher took forks");
                return Step::Reply(Reply::Ok);
            }

            // 待っている間にコネクションが切れたら席を空ける
            // 先に届いたコマンドは 1 つだけ預かり、残りは読まずにバッファに残す
            tokio::select! {
                _ = self.wake[id].notified() => {}
                line = lines.next_line(), if session.pending.is_none() => match line {
                    Ok(Some(next)) => {
                        debug!(id, %next, "holding command sent while waiting for forks");
                        session.pending = Some(next);
                    }
                    Ok(None) | Err(_) => return Step::Disconnected,
                },
            }
        }
    }

    fn admitted(&self, id: usize) -> bool {
        let mut seats = self.seats.lock().unwrap();
        if seats.table.status(id) == Status::Eating {
            seats.served += 1;
            true
        } else {
            false
        }
    }

    fn release(&self, id: usize) {
        let admitted = {
            let mut seats = self.seats.lock().unwrap();
            if !seats.table.release(id) {
                return;
            }
            seats.table.admit_neighbors(id)
        };
        debug!(id, ?admitted, "philosopher put forks down");
        // 状態が変わりうるのは両隣だけなので、その 2 人だけ起こす
        for j in admitted {
            self.wake[j].notify_one();
        }
    }

    // 切断された哲学者は Thinking に戻し、両隣をもう一度評価する
    fn disconnect(&self, id: usize, conn: u64) {
        let (before, admitted) = {
            let mut seats = self.seats.lock().unwrap();
            if seats.owners[id] != Some(conn) {
                return;
            }
            seats.owners[id] = None;
            let before = seats.table.abandon(id);
            (before, seats.table.admit_neighbors(id))
        };
        info!(id, %before, ?admitted, "philosopher disconnected");
        for j in admitted {
            self.wake[j].notify_one();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::tcp::OwnedWriteHalf;

    use Status::*;

    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Client {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, writer) = stream.into_split();
            Client {
                lines: BufReader::new(reader).lines(),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\n").as_bytes())
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> String {
            self.lines.next_line().await.unwrap().unwrap()
        }

        async fn call(&mut self, line: &str) -> String {
            self.send(line).await;
            self.recv().await
        }

        // 応答が来ないことを確かめる
        async fn silent(&mut self) -> bool {
            tokio::time::timeout(Duration::from_millis(100), self.lines.next_line())
                .await
                .is_err()
        }
    }

    async fn start(n: usize) -> (Server, SocketAddr) {
        let server = Server::new(n).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.clone().run(listener, std::future::pending()));
        (server, addr)
    }

    // 状態が変わるまで待つ
    async fn eventually(server: &Server, f: impl Fn(&ArbitrationState) -> bool) {
        for _ in 0..200 {
            if f(&server.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("state never reached: {:?}", server.snapshot());
    }

    #[tokio::test]
    async fn test_take_waits_for_neighbors() {
        let (server, addr) = start(5).await;
        let mut c2 = Client::connect(addr).await;
        let mut c3 = Client::connect(addr).await;

        assert_eq!(c2.call("REGISTER:2").await, "OK");
        assert_eq!(c3.call("REGISTER:3").await, "OK");
        assert_eq!(c2.call("TOMAR:2").await, "OK");

        c3.send("TOMAR:3").await;
        assert!(c3.silent().await);
        assert_eq!(server.snapshot().status(3), Hungry);

        assert_eq!(c2.call("SOLTAR:2").await, "OK");
        assert_eq!(c3.recv().await, "OK");

        let s = server.snapshot();
        assert_eq!(s.statuses(), &[Thinking, Thinking, Thinking, Eating, Thinking]);
        assert!(s.is_consistent());
        assert_eq!(server.served(), 2);
    }

    #[tokio::test]
    async fn test_commands_sent_while_waiting_are_answered_in_order() {
        let (server, addr) = start(5).await;
        let mut c0 = Client::connect(addr).await;
        let mut c1 = Client::connect(addr).await;
        assert_eq!(c0.call("REGISTER:0").await, "OK");
        assert_eq!(c1.call("REGISTER:1").await, "OK");
        assert_eq!(c0.call("TOMAR:0").await, "OK");

        // 応答を待たずに続けて送る
        c1.send("TOMAR:1\nPING\nSOLTAR:1").await;
        assert!(c1.silent().await);
        assert_eq!(server.snapshot().status(1), Hungry);

        assert_eq!(c0.call("SOLTAR:0").await, "OK");
        assert_eq!(c1.recv().await, "OK");
        assert_eq!(c1.recv().await, "PONG");
        assert_eq!(c1.recv().await, "OK");

        let s = server.snapshot();
        assert_eq!(s.statuses(), &[Thinking; 5]);
        assert!(s.is_consistent());
        assert_eq!(server.served(), 2);
    }

    #[tokio::test]
    async fn test_protocol_errors_keep_connection() {
        let (_server, addr) = start(5).await;
        let mut c = Client::connect(addr).await;

        assert_eq!(c.call("PING").await, "PONG");
        assert!(c.call("HELLO").await.starts_with("ERROR:"));
        assert!(c.call("TOMAR:x").await.starts_with("ERROR:"));
        assert!(c.call("TOMAR:1").await.starts_with("ERROR:"));
        assert!(c.call("REGISTER:9").await.starts_with("ERROR:"));
        assert_eq!(c.call("REGISTER:1").await, "OK");
        assert_eq!(c.call("REGISTER:1").await, "OK");
        assert!(c.call("REGISTER:2").await.starts_with("ERROR:"));
        assert!(c.call("SOLTAR:2").await.starts_with("ERROR:"));
        assert_eq!(c.call("SOLTAR:1").await, "OK");
        assert_eq!(c.call("TOMAR:1").await, "OK");
        assert!(c.call("TOMAR:1").await.starts_with("ERROR:"));
        assert_eq!(c.call("PING").await, "PONG");
    }

    #[tokio::test]
    async fn test_seat_taken() {
        let (_server, addr) = start(3).await;
        let mut a = Client::connect(addr).await;
        let mut b = Client::connect(addr).await;
        assert_eq!(a.call("REGISTER:0").await, "OK");
        assert!(b.call("REGISTER:0").await.starts_with("ERROR:"));

        // 切断すると席が空く
        drop(a);
        let mut ok = false;
        for _ in 0..50 {
            if b.call("REGISTER:0").await == "OK" {
                ok = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(ok);
    }

    #[tokio::test]
    async fn test_disconnect_while_eating_frees_neighbor() {
        let (server, addr) = start(5).await;
        let mut c0 = Client::connect(addr).await;
        let mut c1 = Client::connect(addr).await;
        assert_eq!(c0.call("REGISTER:0").await, "OK");
        assert_eq!(c1.call("REGISTER:1").await, "OK");
        assert_eq!(c0.call("TOMAR:0").await, "OK");

        c1.send("TOMAR:1").await;
        assert!(c1.silent().await);

        drop(c0);
        assert_eq!(c1.recv().await, "OK");
        let s = server.snapshot();
        assert_eq!(s.statuses(), &[Thinking, Eating, Thinking, Thinking, Thinking]);
        assert!(s.is_consistent());
    }

    #[tokio::test]
    async fn test_disconnect_while_waiting() {
        let (server, addr) = start(3).await;
        let mut c0 = Client::connect(addr).await;
        let mut c1 = Client::connect(addr).await;
        assert_eq!(c0.call("REGISTER:0").await, "OK");
        assert_eq!(c1.call("REGISTER:1").await, "OK");
        assert_eq!(c0.call("TOMAR:0").await, "OK");

        c1.send("TOMAR:1").await;
        assert!(c1.silent().await);
        drop(c1);
        eventually(&server, |s| s.status(1) == Thinking).await;

        // 1 が居なくなった後も 0 は普通に食事を終えられる
        assert_eq!(c0.call("SOLTAR:0").await, "OK");
        assert_eq!(server.snapshot().statuses(), &[Thinking; 3]);
    }
}
