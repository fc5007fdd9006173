use std::io::Write;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::format::format_number;

pub(crate) struct Ui {
    pb: ProgressBar,
}

impl Ui {
    pub(crate) fn new(total_jobs: u64) -> Self {
        let pb = ProgressBar::with_draw_target(Some(total_jobs), ProgressDrawTarget::stdout());
        let style = ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} jobs {msg}\u{1b}[0K")
            .unwrap()
            .progress_chars("#--");
        pb.set_style(style);
        Self { pb }
    }

    pub(crate) fn println(&self, msg: &str) {
        self.pb.println(msg);
    }

    pub(crate) fn record_batch(&self, jobs: usize, batches: u64) {
        self.pb.inc(jobs as u64);
        self.pb.set_message(format!("({} batches)", format_number(batches)));
    }

    pub(crate) fn set_stop_message(&self, msg: &str) {
        self.pb.set_message(msg.to_string());
    }

    pub(crate) fn freeze(&self) {
        self.pb.abandon();
        let _ = std::io::stdout().write_all(b"\n");
    }
}
