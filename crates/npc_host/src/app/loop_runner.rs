use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::bootstrap::AppWiring;
use super::command_port::{port_from_env, CommandPort};

const MAX_TICKS_PER_ITERATION: u32 = 5;
const MAX_ITERATION_DELTA: Duration = Duration::from_millis(250);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// The single main context: command lines, engine ticks and the final save
/// all happen on this thread.
pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring {
        mut session,
        paths,
        ticks_per_second,
    } = app;

    let mut port = match CommandPort::bind_localhost(port_from_env()) {
        Ok(port) => {
            info!(port = port.bound_port(), "command_port_listening");
            Some(port)
        }
        Err(err) => {
            warn!(error = %err, "command_port_bind_failed_disabled");
            None
        }
    };

    let fixed_dt = Duration::from_secs_f64(1.0 / f64::from(ticks_per_second.max(1)));
    let mut accumulator = Duration::ZERO;
    let mut last_instant = Instant::now();
    let mut lines = Vec::new();

    info!(
        ticks_per_second,
        records = %paths.records_path.display(),
        "host_loop_started"
    );

    while !session.quit_requested() {
        if let Some(port) = port.as_mut() {
            lines.clear();
            port.poll_lines(&mut lines);
            for line in &lines {
                let replies = session.execute_line(line);
                port.send_lines(&replies);
            }
        }

        let now = Instant::now();
        let frame_dt = now.saturating_duration_since(last_instant).min(MAX_ITERATION_DELTA);
        last_instant = now;
        accumulator = accumulator.saturating_add(frame_dt);

        let plan = plan_ticks(accumulator, fixed_dt, MAX_TICKS_PER_ITERATION);
        for _ in 0..plan.ticks_to_run {
            session.engine.tick();
        }
        accumulator = plan.remaining_accumulator;
        if plan.dropped_backlog > Duration::ZERO {
            warn!(
                dropped_backlog_ms = plan.dropped_backlog.as_millis() as u64,
                "tick_backlog_dropped"
            );
        }

        if plan.ticks_to_run == 0 {
            thread::sleep(IDLE_POLL_INTERVAL);
        }
    }

    info!(
        tick = session.engine.current_tick(),
        clients = port.as_ref().map_or(0, CommandPort::client_count),
        "shutdown_requested"
    );
    if let Err(err) = session.engine.shutdown() {
        error!(error = %err, "final_record_save_failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[derive(Debug, Clone, Copy)]
struct TickPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_ticks(mut accumulator: Duration, fixed_dt: Duration, max_ticks: u32) -> TickPlan {
    let mut ticks_to_run = 0u32;
    while accumulator >= fixed_dt && ticks_to_run < max_ticks {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run += 1;
    }

    let dropped_backlog = if accumulator >= fixed_dt {
        std::mem::replace(&mut accumulator, Duration::ZERO)
    } else {
        Duration::ZERO
    };
    TickPlan {
        ticks_to_run,
        remaining_accumulator: accumulator,
        dropped_backlog,
    }
}
