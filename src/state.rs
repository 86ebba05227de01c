use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};
use crate::policy;

// 箸が 2 本以上ないと左右の箸が同じ 1 本になってしまう
pub const MIN_PHILOSOPHERS: usize = 2;

// 哲学者の状態
// 値は共有メモリ上のテーブルに書き込む値そのもの
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Thinking = 0,
    Hungry = 1,
    Eating = 2,
}

impl Status {
    pub fn from_u8(v: u8) -> Option<Status> {
        match v {
            0 => Some(Status::Thinking),
            1 => Some(Status::Hungry),
            2 => Some(Status::Eating),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Thinking => "THINKING",
            Status::Hungry => "HUNGRY",
            Status::Eating => "EATING",
        };
        f.write_str(s)
    }
}

pub fn left_neighbor(i: usize, n: usize) -> usize {
    (i + n - 1) % n
}

pub fn right_neighbor(i: usize, n: usize) -> usize {
    (i + 1) % n
}

// 哲学者 i は箸 i と箸 i + 1 を使う
pub fn forks(i: usize, n: usize) -> [usize; 2] {
    [i, (i + 1) % n]
}

// 輪になった哲学者の状態を読むためのトレイト
// 普通のテーブルと共有メモリ上のアトミックなテーブルが同じ判定関数を使う
pub trait StatusTable {
    fn len(&self) -> usize;
    fn status(&self, i: usize) -> Status;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StatusTable for [Status] {
    fn len(&self) -> usize {
        <[Status]>::len(self)
    }

    fn status(&self, i: usize) -> Status {
        self[i]
    }
}

impl StatusTable for Vec<Status> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn status(&self, i: usize) -> Status {
        self[i]
    }
}

// 他プロセスから見えるメモリを模したテーブル
// 書き込みは必ず global ロックの内側で行う
impl StatusTable for [AtomicU8] {
    fn len(&self) -> usize {
        <[AtomicU8]>::len(self)
    }

    fn status(&self, i: usize) -> Status {
        let v = self[i].load(Ordering::SeqCst);
        Status::from_u8(v).unwrap_or_else(|| panic!("corrupted status {v} for philosopher {i}"))
    }
}

// テーブルの状態。哲学者ごとの状態と、各箸を持っている哲学者 (確認用)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitrationState {
    status: Vec<Status>,
    forks: Vec<Option<usize>>,
}

impl ArbitrationState {
    pub fn new(n: usize) -> Result<Self> {
        if n < MIN_PHILOSOPHERS {
            return Err(Error::Ring(n));
        }
        Ok(ArbitrationState {
            status: vec![Status::Thinking; n],
            forks: vec![None; n],
        })
    }

    pub fn statuses(&self) -> &[Status] {
        &self.status
    }

    pub fn fork_owner(&self, fork: usize) -> Option<usize> {
        self.forks[fork]
    }

    pub fn check_id(&self, id: usize) -> Result<()> {
        if id < self.status.len() {
            Ok(())
        } else {
            Err(Error::UnknownPhilosopher {
                id,
                n: self.status.len(),
            })
        }
    }

    // Thinking -> Hungry
    pub fn hunger(&mut self, id: usize) -> Result<()> {
        self.check_id(id)?;
        match self.status[id] {
            Status::Thinking => {
                self.status[id] = Status::Hungry;
                Ok(())
            }
            status => Err(Error::NotThinking { id, status }),
        }
    }

    // 判定と Eating への遷移はこの 1 回の呼び出しの中で行う
    // 呼び出し側は同じクリティカルセクション内で呼ぶこと
    pub fn admit(&mut self, id: usize) -> bool {
        if !policy::can_admit(self, id) {
            return false;
        }
        self.status[id] = Status::Eating;
        self.take_forks(id);
        true
    }

    // Eating -> Thinking
    // Eating でなければ何もしない
    pub fn release(&mut self, id: usize) -> bool {
        if self.status[id] != Status::Eating {
            return false;
        }
        self.put_forks(id);
        self.status[id] = Status::Thinking;
        true
    }

    // release の後で左右の哲学者を再評価し、食事を許可できた哲学者を返す
    pub fn admit_neighbors(&mut self, id: usize) -> Vec<usize> {
        let n = self.status.len();
        [left_neighbor(id, n), right_neighbor(id, n)]
            .into_iter()
            .filter(|&j| self.admit(j))
            .collect()
    }

    // 待機中に止められた哲学者を Thinking に戻す
    // 箸は持っていないので解放するものはない
    pub fn cancel(&mut self, id: usize) -> bool {
        if self.status[id] != Status::Hungry {
            return false;
        }
        self.status[id] = Status::Thinking;
        true
    }

    // 途中で居なくなった哲学者を Thinking に戻す
    pub fn abandon(&mut self, id: usize) -> Status {
        let before = self.status[id];
        match before {
            Status::Eating => {
                self.release(id);
            }
            Status::Hungry => {
                self.cancel(id);
            }
            Status::Thinking => {}
        }
        before
    }

    fn take_forks(&mut self, id: usize) {
        for fork in forks(id, self.status.len()) {
            // 許可したのに箸が既に使われているなら調停のバグ
            if let Some(owner) = self.forks[fork] {
                panic!("fork {fork} is already held by philosopher {owner} while admitting {id}");
            }
            self.forks[fork] = Some(id);
        }
    }

    fn put_forks(&mut self, id: usize) {
        for fork in forks(id, self.status.len()) {
            if self.forks[fork] == Some(id) {
                self.forks[fork] = None;
            }
        }
    }

    // 隣り合う 2 人が同時に食べていないこと、箸の所有が状態と一致していること
    pub fn is_consistent(&self) -> bool {
        let n = self.status.len();
        if !policy::neighbors_exclusive(self) {
            return false;
        }
        (0..n).all(|i| {
            let [l, r] = forks(i, n);
            let holds = self.forks[l] == Some(i) && self.forks[r] == Some(i);
            match self.status[i] {
                Status::Eating => holds,
                _ => !self.forks.contains(&Some(i)),
            }
        })
    }
}

impl StatusTable for ArbitrationState {
    fn len(&self) -> usize {
        self.status.len()
    }

    fn status(&self, i: usize) -> Status {
        self.status[i]
    }
}
