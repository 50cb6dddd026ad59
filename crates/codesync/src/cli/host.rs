//! Host command: share one file over stdin/stdout.
//!
//! Inbound sync messages arrive as JSON lines on stdin, outbound ones leave as
//! JSON lines on stdout. The file itself plays the editor: it is polled for
//! local changes, and merged peer changes are written back into it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use codesync_core::config::Config;
use codesync_core::crdt::{DocManager, ResourceId, SyncManager, SyncMessage};
use codesync_core::diff::{TextChange, apply_changes};
use codesync_core::error::{Result, SyncError};
use codesync_core::events::{CallbackRegistry, SyncEvent};
use codesync_core::host::{EditorSink, Host};
use codesync_core::transport::{ChannelTransport, decode_line, encode_line};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;

/// Run the host until stdin closes. Returns true on success.
pub fn handle_host(file: &Path, resource: Option<String>, config: &Config) -> bool {
    let path = resource.unwrap_or_else(|| file.to_string_lossy().into_owned());
    let Some(resource) = config.resource_for(path) else {
        eprintln!("✗ Unknown resource kind '{}' in config", config.default_kind);
        return false;
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to start runtime: {}", e);
            return false;
        }
    };

    match runtime.block_on(run_host(file, resource, config)) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}

async fn run_host(file: &Path, resource: ResourceId, config: &Config) -> Result<()> {
    let editor = Arc::new(FileEditor::new(file, resource.clone()));
    let content = editor.read()?;

    let (transport, outbound) = ChannelTransport::new();
    let events = log_events();
    let docs = Arc::new(DocManager::with_text_name(config.text_name.clone()));
    docs.set_event_callback(events.as_callback());
    let sync = SyncManager::new(docs, Arc::new(transport));
    sync.set_event_callback(events.as_callback());

    let writer = tokio::spawn(write_outbound(outbound));
    let host = Host::new(sync, Arc::clone(&editor) as Arc<dyn EditorSink>);

    host.open(&resource, &content)?;
    log::info!("[Host] Sharing {} as {}", file.display(), resource);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => handle_line(&host, &line),
                None => {
                    log::info!("[Host] Input closed, shutting down");
                    break;
                }
            },
            _ = ticker.tick() => poll_file(&host, &editor),
        }
    }

    // Catch an edit made since the last tick before the channel goes away
    poll_file(&host, &editor);
    host.close(&resource);
    drop(host);

    if let Err(e) = writer.await {
        log::warn!("[Host] Output task failed: {}", e);
    }
    Ok(())
}

/// Registry with a single subscriber that logs document and session events.
fn log_events() -> Arc<CallbackRegistry> {
    let events = Arc::new(CallbackRegistry::new());
    events.subscribe(Arc::new(|event: &SyncEvent| match event {
        SyncEvent::SyncStateChanged { resource, state } => {
            log::info!("[Host] {} is {}", resource, state);
        }
        SyncEvent::ContentsChanged {
            resource,
            content,
            origin,
        } => {
            log::debug!(
                "[Host] {} changed ({}, {} chars)",
                resource,
                origin,
                content.chars().count()
            );
        }
    }));
    events
}

fn handle_line(host: &Host, line: &str) {
    match decode_line(line) {
        Ok(Some(message)) => {
            if let Err(e) = host.handle_message(message) {
                log::warn!("[Host] Failed to apply message: {}", e);
            }
        }
        Ok(None) => {}
        Err(e) => log::warn!("[Host] Ignoring malformed line: {}", e),
    }
}

fn poll_file(host: &Host, editor: &FileEditor) {
    match editor.read() {
        Ok(content) => {
            if let Err(e) = host.editor_changed(&editor.resource, &content) {
                log::warn!("[Host] Failed to record edit: {}", e);
            }
        }
        Err(e) => log::debug!("[Host] Skipping poll: {}", e),
    }
}

/// Drain outbound messages onto stdout, one line each.
async fn write_outbound(mut outbound: UnboundedReceiver<SyncMessage>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = outbound.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                log::error!("[Host] Failed to encode {}: {}", message.message_type(), e);
                continue;
            }
        };

        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        };
        if let Err(e) = written.await {
            log::warn!("[Host] Output closed: {}", e);
            break;
        }
    }
}

/// A file on disk acting as the host's editor buffer.
#[derive(Debug)]
struct FileEditor {
    path: PathBuf,
    resource: ResourceId,
}

impl FileEditor {
    fn new(path: &Path, resource: ResourceId) -> Self {
        Self {
            path: path.to_path_buf(),
            resource,
        }
    }

    fn read(&self) -> Result<String> {
        std::fs::read_to_string(&self.path).map_err(|source| SyncError::FileRead {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, content: &str) -> Result<()> {
        std::fs::write(&self.path, content).map_err(|source| SyncError::FileWrite {
            path: self.path.clone(),
            source,
        })
    }

    fn check(&self, resource: &ResourceId) -> Result<()> {
        if *resource == self.resource {
            Ok(())
        } else {
            Err(SyncError::UnknownResource(resource.clone()))
        }
    }
}

impl EditorSink for FileEditor {
    fn current_text(&self, resource: &ResourceId) -> Option<String> {
        self.check(resource).ok()?;
        self.read().ok()
    }

    fn apply_edits(&self, resource: &ResourceId, changes: &[TextChange]) -> Result<()> {
        self.check(resource)?;
        let mut text = self.read()?;
        apply_changes(&mut text, changes)?;
        self.write(&text)
    }

    fn replace_all(&self, resource: &ResourceId, content: &str) -> Result<()> {
        self.check(resource)?;
        self.write(content)
    }
}
