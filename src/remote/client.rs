use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};
use crate::remote::protocol::{Reply, Request};
use crate::table::Coordinator;

// 1 本の TCP コネクション上で 1 行送って 1 行受け取る
struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    fn open<A: ToSocketAddrs>(addr: A) -> Result<(Connection, TcpStream)> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let conn = Connection {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream.try_clone()?),
        };
        Ok((conn, stream))
    }

    fn call(&mut self, request: Request, expected: Reply) -> Result<()> {
        writeln!(self.writer, "{request}")?;
        self.writer.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(Error::Disconnected);
        }
        match line.parse::<Reply>() {
            Ok(reply) if reply == expected => Ok(()),
            Ok(Reply::Error(reason)) => Err(Error::Rejected(reason)),
            Ok(other) => Err(Error::UnexpectedReply(other.to_string())),
            Err(_) => Err(Error::UnexpectedReply(line.trim_end().to_string())),
        }
    }
}

// 登録せずに生存確認だけ行う
pub fn ping<A: ToSocketAddrs>(addr: A) -> Result<()> {
    let (mut conn, _) = Connection::open(addr)?;
    conn.call(Request::Ping, Reply::Pong)
}

// 哲学者プロセスから見たコーディネータ
// コネクションは 1 本だけで、drop すると閉じる。サーバ側では退席として扱われる
pub struct RemoteTable {
    id: usize,
    conn: Mutex<Connection>,
    // shutdown 用に複製したストリーム
    stream: TcpStream,
    in_request: AtomicBool,
    closing: AtomicBool,
}

impl RemoteTable {
    pub fn connect<A: ToSocketAddrs>(addr: A, id: usize) -> Result<Self> {
        let (mut conn, stream) = Connection::open(addr)?;
        conn.call(Request::Register(id), Reply::Ok)?;
        debug!(id, pid = std::process::id(), "registered with coordinator");
        Ok(RemoteTable {
            id,
            conn: Mutex::new(conn),
            stream,
            in_request: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn ping(&self) -> Result<()> {
        self.conn.lock().unwrap().call(Request::Ping, Reply::Pong)
    }

    fn call(&self, request: Request) -> Result<()> {
        let result = self.conn.lock().unwrap().call(request, Reply::Ok);
        match result {
            // 停止処理でソケットを閉じた結果なら失敗ではない
            Err(Error::Io(_)) | Err(Error::Disconnected) if self.closing.load(Ordering::SeqCst) => {
                Err(Error::Cancelled)
            }
            result => result,
        }
    }
}

impl Coordinator for RemoteTable {
    // 応答はサーバ側で食事が許可されるまで返ってこない
    fn request(&self, id: usize) -> Result<()> {
        self.in_request.store(true, Ordering::SeqCst);
        if self.closing.load(Ordering::SeqCst) {
            self.in_request.store(false, Ordering::SeqCst);
            return Err(Error::Cancelled);
        }
        let result = self.call(Request::Take(id));
        self.in_request.store(false, Ordering::SeqCst);
        result
    }

    fn release(&self, id: usize) -> Result<()> {
        self.call(Request::Release(id))
    }

    // 待機中の TOMAR があるときだけソケットを閉じて中断させる
    // 食事中なら SOLTAR を送れるように閉じない
    fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if self.in_request.load(Ordering::SeqCst) {
            if let Err(e) = self.stream.shutdown(Shutdown::Both) {
                debug!(id = self.id, error = %e, "could not shut down connection");
            }
        }
    }
}
