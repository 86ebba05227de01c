use std::env;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{error, info, warn};

use crate::cancel::StopToken;
use crate::config::{Bounds, DinnerConfig, Endpoint};
use crate::error::{Error, Result};
use crate::remote::client;

const READY_TIMEOUT: Duration = Duration::from_secs(10);
// 哲学者プロセスを起動する間隔
const STAGGER: Duration = Duration::from_millis(500);

// コーディネータ 1 プロセスと哲学者 N プロセスを起動する
pub struct Launcher {
    exe: PathBuf,
    config: DinnerConfig,
    endpoint: Endpoint,
    verbose: u8,
}

impl Launcher {
    pub fn new(config: DinnerConfig, endpoint: Endpoint, verbose: u8) -> Result<Self> {
        config.validate()?;
        Ok(Launcher {
            exe: env::current_exe()?,
            config,
            endpoint,
            verbose,
        })
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg(subcommand);
        if self.verbose > 0 {
            cmd.arg(format!("-{}", "v".repeat(self.verbose as usize)));
        }
        cmd.args(["--host", &self.endpoint.host])
            .args(["--port", &self.endpoint.port.to_string()]);
        cmd
    }

    fn spawn_server(&self) -> Result<Child> {
        let mut cmd = self.command("serve");
        cmd.args(["--philosophers", &self.config.philosophers.to_string()]);
        Ok(cmd.spawn()?)
    }

    fn spawn_philosopher(&self, id: usize) -> Result<Child> {
        let mut cmd = self.command("philosopher");
        cmd.args(["--id", &id.to_string()]);
        pause_args(&mut cmd, "think", self.config.think);
        pause_args(&mut cmd, "eat", self.config.eat);
        Ok(cmd.spawn()?)
    }

    // サーバが PING に答えるまで待つ
    fn wait_until_ready(&self, stop: &StopToken) -> Result<()> {
        let addr = self.endpoint.to_string();
        let start = Instant::now();
        loop {
            match client::ping(addr.as_str()) {
                Ok(()) => return Ok(()),
                Err(e) if start.elapsed() > READY_TIMEOUT => return Err(e),
                Err(_) => {}
            }
            if stop.sleep(Duration::from_millis(100)) {
                return Err(Error::Cancelled);
            }
        }
    }

    pub fn run(&self, stop: &StopToken) -> Result<()> {
        info!(
            philosophers = self.config.philosophers,
            secs = self.config.duration.as_secs_f64(),
            endpoint = %self.endpoint,
            "launching coordinator and philosopher processes"
        );

        let mut server = self.spawn_server()?;
        info!(pid = server.id(), "coordinator started");

        let mut philosophers = Vec::new();
        let result = self.seat_all(stop, &mut philosophers);

        // 哲学者を先に止めてからサーバを止める
        for (id, child) in philosophers.iter_mut().enumerate() {
            info!(id, pid = child.id(), "stopping philosopher");
            terminate(child);
        }
        info!(pid = server.id(), "stopping coordinator");
        terminate(&mut server);

        match result {
            Err(Error::Cancelled) => Ok(()),
            result => result,
        }
    }

    fn seat_all(&self, stop: &StopToken, philosophers: &mut Vec<Child>) -> Result<()> {
        self.wait_until_ready(stop)?;

        for id in 0..self.config.philosophers {
            let child = self.spawn_philosopher(id)?;
            info!(id, pid = child.id(), "philosopher process started");
            philosophers.push(child);
            if stop.sleep(STAGGER) {
                return Err(Error::Cancelled);
            }
        }

        info!(
            processes = philosophers.len() + 1,
            "all processes started"
        );
        stop.sleep(self.config.duration);
        Ok(())
    }
}

fn pause_args(cmd: &mut Command, name: &str, bounds: Bounds) {
    cmd.arg(format!("--{name}-min"))
        .arg(bounds.min.as_secs_f64().to_string())
        .arg(format!("--{name}-max"))
        .arg(bounds.max.as_secs_f64().to_string());
}

// SIGTERM を送って終了を待つ
fn terminate(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            warn!(pid = child.id(), %status, "process already exited");
            return;
        }
        Ok(None) => {}
        Err(e) => warn!(pid = child.id(), error = %e, "could not poll process"),
    }

    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        warn!(%pid, error = %e, "SIGTERM failed, killing");
        let _ = child.kill();
    }
    if let Err(e) = child.wait() {
        error!(%pid, error = %e, "could not wait for process");
    }
}
