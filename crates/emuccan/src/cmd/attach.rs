use crate::cmd::AttachArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

#[cfg(unix)]
pub fn run(args: AttachArgs, format: OutputFormat) -> CliResult<i32> {
    unix::run(args, format)
}

#[cfg(not(unix))]
pub fn run(args: AttachArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        format!(
            "cannot attach {}: serial transport requires a unix tty",
            args.device.display()
        ),
    ))
}

#[cfg(unix)]
mod unix {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::Receiver;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use emuccan_frame::LogicalFrame;
    use emuccan_link::{
        AttachedLink, FrameSink, LinkRegistry, PacingDelay, QueueSink, RegistryConfig,
    };
    use emuccan_transport::{SerialPort, TransportError};
    use tracing::{debug, info, warn};

    use crate::cmd::AttachArgs;
    use crate::exit::{
        link_error, transport_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS,
    };
    use crate::output::{print_frame, print_status, OutputFormat};

    const READ_CHUNK: usize = 256;
    const IDLE_POLL: Duration = Duration::from_millis(2);

    pub fn run(args: AttachArgs, format: OutputFormat) -> CliResult<i32> {
        let pacing_delay = args
            .pacing_delay
            .or_else(|| args.bitrate.map(|rate| rate.recommended_delay()))
            .unwrap_or(PacingDelay::ZERO);

        let port = Arc::new(
            SerialPort::open(&args.device).map_err(|err| transport_error("open failed", err))?,
        );
        let registry = LinkRegistry::new(RegistryConfig {
            pacing_delay,
            ..RegistryConfig::default()
        });

        let (can1, rx1) = QueueSink::new();
        let (can2, rx2) = QueueSink::new();
        let sinks: [Arc<dyn FrameSink>; 2] = [can1, can2];
        let attached = registry
            .attach(port.clone(), sinks)
            .map_err(|err| link_error("attach failed", err))?;
        for handle in attached.channels() {
            registry
                .open(handle)
                .map_err(|err| link_error("channel open failed", err))?;
        }
        info!(
            device = %port.path().display(),
            delay = %pacing_delay,
            "adapter attached"
        );

        let running = Arc::new(AtomicBool::new(true));
        install_ctrlc_handler(running.clone())?;

        let mut session = Session {
            port: &port,
            registry: &registry,
            attached: &attached,
            receivers: [rx1, rx2],
            pending: args.send.iter().copied().collect(),
            printed: 0,
        };
        let result = session.pump(&running, &args, format);

        if args.stats {
            print_status(&registry.status(), format);
        }
        shutdown(&registry, &attached);
        result
    }

    struct Session<'a> {
        port: &'a Arc<SerialPort>,
        registry: &'a LinkRegistry,
        attached: &'a AttachedLink,
        receivers: [Receiver<LogicalFrame>; 2],
        pending: VecDeque<LogicalFrame>,
        printed: usize,
    }

    impl Session<'_> {
        fn pump(
            &mut self,
            running: &AtomicBool,
            args: &AttachArgs,
            format: OutputFormat,
        ) -> CliResult<i32> {
            let mut buf = [0u8; READ_CHUNK];

            while running.load(Ordering::SeqCst) {
                let read = match self.port.read(&mut buf) {
                    Ok(n) => n,
                    Err(TransportError::Closed) => {
                        warn!("adapter hung up");
                        self.attached.hangup();
                        return Err(CliError::new(FAILURE, "adapter hung up"));
                    }
                    Err(err) => return Err(transport_error("read failed", err)),
                };
                if read > 0 {
                    self.attached.feed(&buf[..read], None);
                }

                if self.port.wakeup_wanted() {
                    self.attached
                        .write_wakeup()
                        .map_err(|err| link_error("write failed", err))?;
                }
                self.send_next()?;

                for (index, rx) in self.receivers.iter().enumerate() {
                    let source = self.attached.channels()[index].name();
                    for frame in rx.try_iter() {
                        print_frame(&frame, source, format);
                        self.printed = self.printed.saturating_add(1);
                    }
                }

                if args.count.is_some_and(|count| self.printed >= count) {
                    return Ok(SUCCESS);
                }
                if args.send_only && self.pending.is_empty() && !self.tx_busy() {
                    return Ok(SUCCESS);
                }
                if read == 0 {
                    thread::sleep(IDLE_POLL);
                }
            }

            Ok(SUCCESS)
        }

        fn send_next(&mut self) -> CliResult<()> {
            if self.tx_busy() {
                return Ok(());
            }
            let Some(frame) = self.pending.pop_front() else {
                return Ok(());
            };
            let handle = self.attached.channel(frame.channel());
            let outcome = self
                .registry
                .transmit(handle, &frame)
                .map_err(|err| link_error("transmit failed", err))?;
            debug!(channel = handle.name(), id = frame.id(), ?outcome, "queued frame sent");
            Ok(())
        }

        fn tx_busy(&self) -> bool {
            self.attached.link().is_some_and(|link| link.tx_busy())
        }
    }

    fn shutdown(registry: &LinkRegistry, attached: &AttachedLink) {
        if let Some(link) = attached.link() {
            if link.is_attached() {
                if let Err(err) = link.flush().and_then(|()| link.send_handshake(false)) {
                    warn!(error = %err, "deactivation failed");
                }
            }
        }
        for handle in attached.channels() {
            if let Err(err) = registry.teardown(handle) {
                debug!(channel = handle.name(), error = %err, "teardown");
            }
        }
    }

    fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
    }
}
