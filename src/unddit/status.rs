/// What the host sees of a thread view while it loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Loading(String),
    Success,
    Error {
        message: String,
        help_url: Option<String>,
    },
    Progress {
        loaded: usize,
        total: usize,
    },
}

pub trait StatusSink: Send + Sync {
    fn update(&self, event: StatusEvent);

    fn loading(&self, phase: &str) {
        self.update(StatusEvent::Loading(phase.to_string()));
    }

    fn success(&self) {
        self.update(StatusEvent::Success);
    }

    fn error(&self, message: &str, help_url: Option<&str>) {
        self.update(StatusEvent::Error {
            message: message.to_string(),
            help_url: help_url.map(str::to_string),
        });
    }

    fn progress(&self, loaded: usize, total: usize) {
        self.update(StatusEvent::Progress { loaded, total });
    }
}

/// Sink used by the CLI; everything goes to the log.
pub struct LogSink;

impl StatusSink for LogSink {
    fn update(&self, event: StatusEvent) {
        match event {
            StatusEvent::Loading(phase) => log::info!("{phase}"),
            StatusEvent::Success => log::info!("done"),
            StatusEvent::Error { message, help_url } => match help_url {
                Some(url) => log::error!("{message} (see {url})"),
                None => log::error!("{message}"),
            },
            StatusEvent::Progress { loaded, total } => {
                log::debug!("comments loaded {loaded}/{total}")
            }
        }
    }
}
