use crate::error::Result;
use colored::{ColoredString, Colorize};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bars of a batch run: companies attempted, succeeded and failed.
pub(crate) struct BatchProgress {
    multi: MultiProgress,
    total: ProgressBar,
    success: ProgressBar,
    fails: ProgressBar,
}

impl BatchProgress {
    pub(crate) fn new(len: usize) -> Result<Self> {
        // overall multi progress bar
        let multi = MultiProgress::new();

        // total number of companies to collect
        let total = multi.add(
            ProgressBar::new(len as u64).with_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.magenta}\n \
                            {msg:>9.white} |{bar:57.white/grey}| {pos:<2} / {human_len} \
                            ({percent_precise}%) [Time: {elapsed}, ETA: {eta}]",
                    )?
                    .progress_chars("## "),
            ),
        );
        total.set_message("companies");
        total.enable_steady_tick(Duration::from_millis(100));

        let success = multi.insert_after(
            &total,
            ProgressBar::new(len as u64).with_style(
                ProgressStyle::default_bar()
                    .template(" {msg:>9.green} |{bar:57.green}| {pos:<2.green}")?
                    .progress_chars("## "),
            ),
        );
        success.set_message("successes");

        let fails = multi.insert_after(
            &success,
            ProgressBar::new(len as u64).with_style(
                ProgressStyle::default_bar()
                    .template(" {msg:>9.red} |{bar:57.red}| {pos:<2.red}")?
                    .progress_chars("## "),
            ),
        );
        fails.set_message("failures");

        Ok(Self {
            multi,
            total,
            success,
            fails,
        })
    }

    /// Spinner under the bars showing what the current company is doing.
    pub(crate) fn spinner(&self, msg: String) -> ProgressBar {
        let spinner = self.multi.add(
            ProgressBar::new_spinner().with_message(msg).with_style(
                ProgressStyle::default_spinner()
                    .template("\t   > {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            ),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    pub(crate) fn succeeded(&self) {
        self.success.inc(1);
        self.total.inc(1);
    }

    pub(crate) fn failed(&self) {
        self.fails.inc(1);
        self.total.inc(1);
    }

    /// Print a status line above the bars.
    pub(crate) fn println(&self, status: Status, msg: &str) {
        self.multi.println(format!("{} {msg}", tag(status))).ok();
    }

    pub(crate) fn finish(&self) {
        self.total.finish();
        self.success.finish();
        self.fails.finish();
    }
}

/// One status line, e.g. `[ + ] Inserted financials for MSFT`.
pub(crate) fn banner(status: Status, msg: &str) {
    println!("{} {msg}", tag(status));
}

fn tag(status: Status) -> ColoredString {
    match status {
        Status::Info => "[ . ]".cyan(),
        Status::Done => "[ + ]".green(),
        Status::Failed => "[ - ]".red(),
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Status {
    Info,
    Done,
    Failed,
}
