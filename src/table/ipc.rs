use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use tracing::debug;

use crate::error::{Error, Result};
use crate::policy;
use crate::semaphore::Semaphore;
use crate::state::{
    forks, left_neighbor, right_neighbor, Status, StatusTable, MIN_PHILOSOPHERS,
};
use crate::table::Coordinator;

// プロセス間通信を模したテーブル
// 各哲学者はお互いの私的な状態に触れず、セマフォとアトミックな共有メモリだけで協調する
pub struct IpcTable {
    // 状態テーブルを調べる間だけ取るバイナリセマフォ
    global: Semaphore,
    // 共有メモリ上の状態テーブル
    states: Vec<AtomicU8>,
    // 哲学者ごとの待機用セマフォ。条件変数の代わり
    wait: Vec<Semaphore>,
    // 箸ごとのセマフォ。判定は states で行うので二重チェック用
    forks: Vec<Semaphore>,
    closed: AtomicBool,
    served: AtomicU64,
}

impl IpcTable {
    pub fn new(n: usize) -> Result<Self> {
        if n < MIN_PHILOSOPHERS {
            return Err(Error::Ring(n));
        }
        Ok(IpcTable {
            global: Semaphore::new(1),
            states: (0..n).map(|_| AtomicU8::new(Status::Thinking as u8)).collect(),
            wait: (0..n).map(|_| Semaphore::new(0)).collect(),
            forks: (0..n).map(|_| Semaphore::new(1)).collect(),
            closed: AtomicBool::new(false),
            served: AtomicU64::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    // global を取った状態で全員の状態を読む
    pub fn snapshot(&self) -> Vec<Status> {
        self.global.wait();
        let states = (0..self.len()).map(|i| self.states.status(i)).collect();
        self.global.post();
        states
    }

    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    // 箸セマフォのうち今空いている本数
    pub fn free_forks(&self) -> usize {
        self.forks.iter().filter(|f| f.available() > 0).count()
    }

    fn check_id(&self, id: usize) -> Result<()> {
        if id < self.len() {
            Ok(())
        } else {
            Err(Error::UnknownPhilosopher { id, n: self.len() })
        }
    }

    fn set(&self, id: usize, status: Status) {
        self.states[id].store(status as u8, Ordering::SeqCst);
    }

    // global を保持している間だけ呼ぶこと
    fn authorize(&self, id: usize) -> bool {
        if policy::can_admit(self.states.as_slice(), id) {
            self.set(id, Status::Eating);
            debug!(id, "authorized to eat");
            true
        } else {
            false
        }
    }

    fn take_forks(&self, id: usize) {
        for fork in forks(id, self.len()) {
            // 許可が出ているのに箸が取れないなら調停のバグ
            assert!(
                self.forks[fork].try_wait(),
                "fork {fork} is already held while philosopher {id} was admitted"
            );
        }
    }
}

impl Coordinator for IpcTable {
    fn request(&self, id: usize) -> Result<()> {
        self.check_id(id)?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        self.global.wait();
        let status = self.states.status(id);
        if status != Status::Thinking {
            self.global.post();
            return Err(Error::NotThinking { id, status });
        }
        self.set(id, Status::Hungry);
        let admitted = self.authorize(id);
        self.global.post();

        if admitted {
            self.wait[id].post();
        } else {
            debug!(id, "blocked waiting for forks");
        }

        // 許可されるか停止されるまで待つ
        self.wait[id].wait();

        self.global.wait();
        if self.states.status(id) != Status::Eating {
            // 許可以外で起こされるのは停止のときだけ
            debug_assert!(self.closed.load(Ordering::SeqCst));
            self.set(id, Status::Thinking);
            self.global.post();
            debug!(id, "request cancelled");
            return Err(Error::Cancelled);
        }
        self.global.post();

        self.take_forks(id);
        self.served.fetch_add(1, Ordering::SeqCst);
        let [left, right] = forks(id, self.len());
        debug!(id, left, right, "philosopher took forks");
        Ok(())
    }

    fn release(&self, id: usize) -> Result<()> {
        self.check_id(id)?;
        let n = self.len();

        self.global.wait();
        if self.states.status(id) != Status::Eating {
            self.global.post();
            return Ok(());
        }
        let [left, right] = forks(id, n);
        self.forks[right].post();
        self.forks[left].post();
        self.set(id, Status::Thinking);

        let admitted: Vec<usize> = [left_neighbor(id, n), right_neighbor(id, n)]
            .into_iter()
            .filter(|&j| self.authorize(j))
            .collect();
        self.global.post();

        // 起こすのはロックの外で、許可 1 回につき 1 回だけ
        for j in admitted {
            debug!(id, neighbor = j, "notifying neighbor");
            self.wait[j].post();
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for w in &self.wait {
            w.post();
        }
    }
}
