use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use libc::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

// 外部から哲学者たちを止めるためのフラグ
// sleep 中でも stop されたらすぐに起きる
#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (stopped, cond) = &*self.inner;
        *stopped.lock().unwrap() = true;
        cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    // 最大 d だけ眠る。stop されていたら true
    pub fn sleep(&self, d: Duration) -> bool {
        let (stopped, cond) = &*self.inner;
        let guard = stopped.lock().unwrap();
        let (guard, _) = cond
            .wait_timeout_while(guard, d, |stopped| !*stopped)
            .unwrap();
        *guard
    }
}

// SIGINT / SIGTERM を受けたら stop して on_stop を呼ぶ
pub fn stop_on_signals<F>(stop: StopToken, on_stop: F) -> io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, pid = std::process::id(), "received signal, stopping");
            stop.stop();
            on_stop();
        }
    });
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_times_out() {
        let stop = StopToken::new();
        assert!(!stop.sleep(Duration::from_millis(20)));
        assert!(!stop.is_stopped());
    }

    #[test]
    fn test_stop_wakes_sleeper() {
        let stop = StopToken::new();
        let stop0 = stop.clone();
        let start = Instant::now();
        let t = thread::spawn(move || stop0.sleep(Duration::from_secs(60)));
        thread::sleep(Duration::from_millis(20));
        stop.stop();
        assert!(t.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(30));
        assert!(stop.sleep(Duration::from_secs(60)));
    }
}
