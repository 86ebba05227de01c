use std::sync::Arc;
use std::thread;

use tracing::{debug, info};

use crate::cancel::StopToken;
use crate::error::{Error, Result};
use crate::pause::Pause;
use crate::table::Coordinator;

// 哲学者
// 自分の状態は持たず、遷移はすべてテーブルに頼む
pub struct Philosopher<C: ?Sized> {
    id: usize,
    table: Arc<C>,
    think: Box<dyn Pause + Send>,
    eat: Box<dyn Pause + Send>,
    meals: u64,
}

impl<C: Coordinator + ?Sized> Philosopher<C> {
    pub fn new(
        id: usize,
        table: Arc<C>,
        think: impl Pause + Send + 'static,
        eat: impl Pause + Send + 'static,
    ) -> Self {
        Philosopher {
            id,
            table,
            think: Box::new(think),
            eat: Box::new(eat),
            meals: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    // think -> request -> eat -> release を止められるまで繰り返し、食事の回数を返す
    pub fn run(mut self, stop: &StopToken) -> Result<u64> {
        info!(id = self.id, "philosopher sits down");
        loop {
            if stop.is_stopped() {
                break;
            }
            if self.think(stop) {
                break;
            }

            debug!(id = self.id, "hungry");
            match self.table.request(self.id) {
                Ok(()) => {}
                Err(Error::Cancelled) => break,
                Err(e) => return Err(e),
            }

            // 食べ始めたら止められても最後まで食べて箸を返す
            self.eat();
            match self.table.release(self.id) {
                Ok(()) => {}
                Err(Error::Cancelled) => break,
                Err(e) => return Err(e),
            }
        }
        info!(id = self.id, meals = self.meals, "philosopher leaves the table");
        Ok(self.meals)
    }

    // stop されたら true
    fn think(&mut self, stop: &StopToken) -> bool {
        let d = self.think.sample();
        debug!(id = self.id, secs = d.as_secs_f64(), "thinking");
        stop.sleep(d)
    }

    fn eat(&mut self) {
        let d = self.eat.sample();
        self.meals += 1;
        debug!(id = self.id, secs = d.as_secs_f64(), "eating");
        thread::sleep(d);
    }
}
