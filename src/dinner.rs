use std::panic;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::cancel::StopToken;
use crate::config::DinnerConfig;
use crate::error::Result;
use crate::pause::Uniform;
use crate::philosopher::Philosopher;
use crate::state::Status;
use crate::table::{Coordinator, IpcTable, MonitorTable};

// 食事の回数と終了時の状態の集計
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub meals: Vec<u64>,
    pub states: Vec<Status>,
}

impl Report {
    pub fn total(&self) -> u64 {
        self.meals.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.meals.is_empty() {
            return 0.0;
        }
        self.total() as f64 / self.meals.len() as f64
    }

    pub fn log(&self) {
        for (id, meals) in self.meals.iter().enumerate() {
            info!(id, meals, "philosopher statistics");
        }
        info!(total = self.total(), mean = self.mean(), "dinner statistics");
        for (id, status) in self.states.iter().enumerate() {
            info!(id, %status, "final state");
        }
    }
}

// 哲学者ごとにスレッドを作り、duration が過ぎるか stop されるまで食事させる
pub fn dine<C>(
    table: Arc<C>,
    philosophers: Vec<Philosopher<C>>,
    duration: Duration,
    stop: &StopToken,
) -> Result<Report>
where
    C: Coordinator + ?Sized + 'static,
{
    let mut v = Vec::new();
    for p in philosophers {
        let stop0 = stop.clone();
        let t = thread::Builder::new()
            .name(format!("philosopher-{}", p.id()))
            .spawn(move || p.run(&stop0))?;
        v.push(t);
    }

    stop.sleep(duration);
    stop.stop();
    // 待機中の哲学者を起こす
    table.shutdown();

    let mut meals = Vec::with_capacity(v.len());
    for t in v {
        match t.join() {
            Ok(result) => meals.push(result?),
            // 不変条件違反の panic はそのまま伝える
            Err(e) => panic::resume_unwind(e),
        }
    }
    Ok(Report {
        meals,
        states: Vec::new(),
    })
}

// 乱数の think / eat で全員を座らせる
pub fn seat<C>(table: &Arc<C>, config: &DinnerConfig) -> Vec<Philosopher<C>>
where
    C: Coordinator + ?Sized,
{
    (0..config.philosophers)
        .map(|id| {
            Philosopher::new(
                id,
                table.clone(),
                Uniform::new(config.think),
                Uniform::new(config.eat),
            )
        })
        .collect()
}

// モニタ版
pub fn run_threads(config: &DinnerConfig, stop: &StopToken) -> Result<Report> {
    config.validate()?;
    let table = Arc::new(MonitorTable::new(config.philosophers)?);
    info!(philosophers = config.philosophers, "starting dinner with a monitor");
    let mut report = dine(table.clone(), seat(&table, config), config.duration, stop)?;
    report.states = table.snapshot().statuses().to_vec();
    info!(served = table.served(), "dinner finished");
    Ok(report)
}

// セマフォ版
pub fn run_ipc(config: &DinnerConfig, stop: &StopToken) -> Result<Report> {
    config.validate()?;
    let table = Arc::new(IpcTable::new(config.philosophers)?);
    info!(philosophers = config.philosophers, "starting dinner with semaphores");
    let mut report = dine(table.clone(), seat(&table, config), config.duration, stop)?;
    report.states = table.snapshot();
    info!(
        served = table.served(),
        free_forks = table.free_forks(),
        "dinner finished"
    );
    Ok(report)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Bounds;

    fn quick(n: usize) -> DinnerConfig {
        DinnerConfig {
            philosophers: n,
            duration: Duration::from_millis(200),
            think: Bounds::from_secs(0.0, 0.001).unwrap(),
            eat: Bounds::from_secs(0.0, 0.001).unwrap(),
        }
    }

    #[test]
    fn test_report() {
        let report = Report {
            meals: vec![1, 2, 3],
            states: vec![Status::Thinking; 3],
        };
        assert_eq!(report.total(), 6);
        assert_eq!(report.mean(), 2.0);
        let empty = Report {
            meals: vec![],
            states: vec![],
        };
        assert_eq!(empty.mean(), 0.0);
    }

    #[test]
    fn test_run_threads() {
        let report = run_threads(&quick(5), &StopToken::new()).unwrap();
        assert_eq!(report.meals.len(), 5);
        assert!(report.total() > 0);
        // 全員が箸を置いて終わる
        assert_eq!(report.states, vec![Status::Thinking; 5]);
    }

    #[test]
    fn test_run_ipc() {
        let report = run_ipc(&quick(3), &StopToken::new()).unwrap();
        assert_eq!(report.meals.len(), 3);
        assert!(report.total() > 0);
        assert_eq!(report.states, vec![Status::Thinking; 3]);
    }

    #[test]
    fn test_rejects_small_ring() {
        assert!(run_threads(&quick(1), &StopToken::new()).is_err());
        assert!(run_ipc(&quick(0), &StopToken::new()).is_err());
    }
}
