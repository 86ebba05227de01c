use std::sync::{Condvar, Mutex};

// セマフォ
// cnt は現在の利用数。cnt が max 未満の間だけ wait を通過できる
// max = 0 で作ると、post されるまで誰も通れない待機用セマフォになる
pub struct Semaphore {
    mutex: Mutex<isize>,
    cond: Condvar,
    max: isize,
}

impl Semaphore {
    pub fn new(max: isize) -> Self {
        Semaphore {
            mutex: Mutex::new(0),
            cond: Condvar::new(),
            max,
        }
    }

    pub fn wait(&self) {
        let mut cnt = self.mutex.lock().unwrap();
        while *cnt >= self.max {
            cnt = self.cond.wait(cnt).unwrap();
        }
        *cnt += 1;
    }

    // 待たずに獲得を試みる
    pub fn try_wait(&self) -> bool {
        let mut cnt = self.mutex.lock().unwrap();
        if *cnt >= self.max {
            return false;
        }
        *cnt += 1;
        true
    }

    pub fn post(&self) {
        let mut cnt = self.mutex.lock().unwrap();
        *cnt -= 1;
        if *cnt <= self.max {
            self.cond.notify_one();
        }
    }

    // 今すぐ wait を通過できる回数
    pub fn available(&self) -> isize {
        self.max - *self.mutex.lock().unwrap()
    }
}
