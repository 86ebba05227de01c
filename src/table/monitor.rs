use std::sync::{Condvar, Mutex};

use tracing::debug;

use crate::error::{Error, Result};
use crate::state::{forks, ArbitrationState, Status, StatusTable};
use crate::table::Coordinator;

struct Inner {
    table: ArbitrationState,
    closed: bool,
    served: u64,
}

// モニタによるテーブル
// 状態テーブルは 1 つのロックで保護し、条件変数は全員で共有する
pub struct MonitorTable {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl MonitorTable {
    pub fn new(n: usize) -> Result<Self> {
        Ok(MonitorTable {
            inner: Mutex::new(Inner {
                table: ArbitrationState::new(n)?,
                closed: false,
                served: 0,
            }),
            cond: Condvar::new(),
        })
    }

    pub fn snapshot(&self) -> ArbitrationState {
        self.inner.lock().unwrap().table.clone()
    }

    // 食事を許可した回数
    pub fn served(&self) -> u64 {
        self.inner.lock().unwrap().served
    }
}

impl Coordinator for MonitorTable {
    fn request(&self, id: usize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.table.check_id(id)?;
        if inner.closed {
            return Err(Error::Cancelled);
        }
        inner.table.hunger(id)?;
        let [left, right] = forks(id, inner.table.len());
        debug!(id, left, right, "philosopher asks for forks");

        loop {
            // 隣の release で既に許可されているか、自分で許可を取れたら食事へ
            if inner.table.status(id) == Status::Eating || inner.table.admit(id) {
                break;
            }
            if inner.closed {
                inner.table.cancel(id);
                debug!(id, "request cancelled");
                return Err(Error::Cancelled);
            }
            // ロックを手放して待機し、起きたら取り直して再評価
            inner = self.cond.wait(inner).unwrap();
        }

        inner.served += 1;
        debug!(id, left, right, "philosopher took forks");
        Ok(())
    }

    fn release(&self, id: usize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.table.check_id(id)?;
        if !inner.table.release(id) {
            return Ok(());
        }
        let admitted = inner.table.admit_neighbors(id);
        debug!(id, ?admitted, "philosopher put forks down");

        // 誰の条件が変わったかは追跡しないので全員起こす
        self.cond.notify_all();
        Ok(())
    }

    fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.cond.notify_all();
    }
}
