//! Remote surface side of a session: a UI rendering and editing live copies.
//!
//! [`RemoteSurface`] keeps an [`EditCoordinator`] per open resource and runs as
//! a single async loop over three sources: content snapshots from the UI,
//! messages from the host, and the nearest debounce deadline.
//!
//! When the host restarts it seeds a new replica, and the surface cannot merge
//! its old one into it without duplicating the text. The surface then drops its
//! replica, waits until the host's content has arrived, and replays any edit
//! that was still pending on top of it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use crate::config::Config;
use crate::coordinator::{EditCoordinator, FlushOutcome};
use crate::crdt::{ResourceId, SyncManager, SyncMessage};

/// Input from the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceInput {
    /// A view for `resource` was mounted; start syncing it.
    Open(ResourceId),
    /// The view now shows `content`.
    Edit {
        /// Edited resource.
        resource: ResourceId,
        /// Full content of the view.
        content: String,
    },
    /// The view was unmounted.
    Close(ResourceId),
    /// The channel to the host was rebuilt.
    Reconnected,
}

/// Output to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceOutput {
    /// Render `content` for `resource`.
    Content {
        /// Resource to re-render.
        resource: ResourceId,
        /// Its new content.
        content: String,
    },
    /// Whether the last delta from the host for `resource` merged cleanly.
    Connected {
        /// Resource the status is about.
        resource: ResourceId,
        /// `true` after a successful merge, `false` after a failed one.
        connected: bool,
    },
}

/// Remote surface driver over a [`SyncManager`].
pub struct RemoteSurface {
    sync: SyncManager,
    window: Duration,
    coordinators: HashMap<ResourceId, EditCoordinator>,
    /// Resources whose replica was rebuilt and is still catching up, with the
    /// latest input to replay once it has.
    rebuilding: HashMap<ResourceId, Option<String>>,
}

impl RemoteSurface {
    /// Create a surface with the debounce window from `config`.
    pub fn new(sync: SyncManager, config: &Config) -> Self {
        sync.set_rebuild_on_peer_restart(true);
        Self {
            sync,
            window: config.debounce(),
            coordinators: HashMap::new(),
            rebuilding: HashMap::new(),
        }
    }

    /// The underlying sync manager.
    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    /// Start syncing `resource`; sends `Init` to the host.
    pub fn open(&mut self, resource: &ResourceId) {
        let doc = self.sync.open(resource);
        self.coordinators
            .entry(resource.clone())
            .or_insert_with(|| EditCoordinator::new(doc, self.window));
    }

    /// Stop syncing `resource` and drop its document.
    ///
    /// A pending edit is flushed first so it is not lost.
    pub fn close(&mut self, resource: &ResourceId) -> Vec<SurfaceOutput> {
        let outputs = self.flush(resource);
        self.coordinators.remove(resource);
        self.rebuilding.remove(resource);
        self.sync.close(resource);
        outputs
    }

    /// Record a content snapshot from the view.
    pub fn input(&mut self, resource: &ResourceId, content: &str, now: Instant) {
        if let Some(replay) = self.rebuilding.get_mut(resource) {
            *replay = Some(content.to_string());
            return;
        }
        match self.coordinators.get_mut(resource) {
            Some(coordinator) => {
                coordinator.on_input(content, now);
            }
            None => log::warn!("[Surface] Input for unopened resource {}", resource),
        }
    }

    /// Restart the handshake for every open resource after a reconnect.
    pub fn reconnect(&mut self) {
        self.sync.reset();
        let resources: Vec<ResourceId> = self.coordinators.keys().cloned().collect();
        for resource in resources {
            self.sync.open(&resource);
        }
    }

    /// Earliest debounce deadline across all resources.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.coordinators
            .values()
            .filter_map(EditCoordinator::deadline)
            .min()
    }

    /// Flush every coordinator whose deadline has passed.
    pub fn flush_due(&mut self, now: Instant) -> Vec<SurfaceOutput> {
        let due: Vec<ResourceId> = self
            .coordinators
            .iter()
            .filter(|(_, c)| c.is_due(now))
            .map(|(r, _)| r.clone())
            .collect();

        due.iter().flat_map(|r| self.flush(r)).collect()
    }

    /// Flush the pending edit of `resource` immediately.
    pub fn flush(&mut self, resource: &ResourceId) -> Vec<SurfaceOutput> {
        let Some(coordinator) = self.coordinators.get_mut(resource) else {
            return Vec::new();
        };

        match coordinator.flush() {
            Ok(FlushOutcome::Unchanged) => Vec::new(),
            Ok(FlushOutcome::Exported(message)) => {
                self.sync.send(message);
                Vec::new()
            }
            Ok(FlushOutcome::Resynced(content)) => vec![SurfaceOutput::Content {
                resource: resource.clone(),
                content,
            }],
            Err(e) => {
                log::error!("[Surface] Failed to flush edit for {}: {}", resource, e);
                Vec::new()
            }
        }
    }

    /// Handle a message from the host.
    ///
    /// A pending local edit for the same resource is flushed before an update
    /// is merged, so the edit is diffed against the baseline it was typed on.
    pub fn handle_message(&mut self, message: SyncMessage) -> Vec<SurfaceOutput> {
        let resource = message.resource().clone();
        let is_update = matches!(message, SyncMessage::Update { .. });

        let mut outputs = Vec::new();
        if is_update
            && self
                .coordinators
                .get(&resource)
                .is_some_and(EditCoordinator::has_pending)
        {
            outputs.extend(self.flush(&resource));
        }

        match self.sync.handle_message(message) {
            Ok(result) => {
                if result.peer_restarted {
                    self.rebuild(&resource);
                }
                let rendered = result.content.is_some();
                if let Some(content) = result.content {
                    if let Some(coordinator) = self.coordinators.get_mut(&resource) {
                        coordinator.accept_remote(&content);
                    }
                    outputs.push(SurfaceOutput::Content {
                        resource: resource.clone(),
                        content,
                    });
                }
                outputs.extend(self.finish_rebuild(&resource, rendered));
                if is_update {
                    outputs.push(SurfaceOutput::Connected {
                        resource,
                        connected: true,
                    });
                }
            }
            Err(e) => {
                log::warn!("[Surface] Dropping message for {}: {}", resource, e);
                if is_update {
                    outputs.push(SurfaceOutput::Connected {
                        resource,
                        connected: false,
                    });
                }
            }
        }
        outputs
    }

    /// Swap in a coordinator for the rebuilt replica, keeping the pending input.
    fn rebuild(&mut self, resource: &ResourceId) {
        let Some(mut previous) = self.coordinators.remove(resource) else {
            return;
        };
        log::info!("[Surface] Host restarted, resyncing {}", resource);

        let doc = self.sync.docs().get(resource);
        self.coordinators
            .insert(resource.clone(), EditCoordinator::new(doc, self.window));
        self.rebuilding
            .insert(resource.clone(), previous.take_pending());
    }

    /// Once a rebuilt replica holds everything the host had, render it and
    /// replay the input kept aside while it caught up.
    fn finish_rebuild(&mut self, resource: &ResourceId, rendered: bool) -> Vec<SurfaceOutput> {
        if !self.rebuilding.contains_key(resource) || !self.sync.has_caught_up(resource) {
            return Vec::new();
        }
        let replay = self.rebuilding.remove(resource).flatten();
        let Some(coordinator) = self.coordinators.get_mut(resource) else {
            return Vec::new();
        };

        let content = coordinator.doc().text();
        coordinator.accept_remote(&content);
        let mut outputs = Vec::new();
        if !rendered {
            outputs.push(SurfaceOutput::Content {
                resource: resource.clone(),
                content,
            });
        }

        if let Some(text) = replay
            && coordinator.on_input(&text, Instant::now())
        {
            outputs.extend(self.flush(resource));
        }
        outputs
    }

    /// Run until either input channel closes.
    ///
    /// Pending edits are flushed before returning.
    pub async fn run(
        mut self,
        mut input: mpsc::UnboundedReceiver<SurfaceInput>,
        mut inbound: mpsc::UnboundedReceiver<SyncMessage>,
        output: mpsc::UnboundedSender<SurfaceOutput>,
    ) {
        let publish = |outputs: Vec<SurfaceOutput>| {
            for out in outputs {
                if output.send(out).is_err() {
                    log::debug!("[Surface] UI output closed");
                }
            }
        };

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                event = input.recv() => match event {
                    Some(SurfaceInput::Open(resource)) => self.open(&resource),
                    Some(SurfaceInput::Edit { resource, content }) => {
                        self.input(&resource, &content, Instant::now());
                    }
                    Some(SurfaceInput::Close(resource)) => publish(self.close(&resource)),
                    Some(SurfaceInput::Reconnected) => self.reconnect(),
                    None => break,
                },
                message = inbound.recv() => match message {
                    Some(message) => publish(self.handle_message(message)),
                    None => break,
                },
                _ = sleep_until_deadline(deadline) => {
                    publish(self.flush_due(Instant::now()));
                }
            }
        }

        let open: Vec<ResourceId> = self.coordinators.keys().cloned().collect();
        for resource in open {
            publish(self.flush(&resource));
        }
        log::info!("[Surface] Stopped");
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for RemoteSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSurface")
            .field("sync", &self.sync)
            .field("window", &self.window)
            .field("open", &self.coordinators.len())
            .field("rebuilding", &self.rebuilding.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{DocManager, TextDoc, UpdateOrigin};
    use crate::transport::ChannelTransport;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn res() -> ResourceId {
        ResourceId::code("view.ts")
    }

    fn create_surface() -> (RemoteSurface, UnboundedReceiver<SyncMessage>) {
        let (transport, rx) = ChannelTransport::new();
        let sync = SyncManager::new(Arc::new(DocManager::new()), Arc::new(transport));
        (RemoteSurface::new(sync, &Config::default()), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<SyncMessage>) -> Vec<SyncMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_open_sends_init() {
        let (mut surface, mut rx) = create_surface();
        surface.open(&res());
        assert_eq!(drain(&mut rx), vec![SyncMessage::init(res())]);
    }

    #[test]
    fn test_update_publishes_content_and_connected() {
        let (mut surface, _rx) = create_surface();
        surface.open(&res());

        let host = TextDoc::new(res());
        host.insert(0, "from host").unwrap();
        let outputs =
            surface.handle_message(SyncMessage::update(res(), host.export_delta().unwrap()));
        assert_eq!(
            outputs,
            vec![
                SurfaceOutput::Content {
                    resource: res(),
                    content: "from host".to_string()
                },
                SurfaceOutput::Connected {
                    resource: res(),
                    connected: true
                },
            ]
        );
    }

    #[test]
    fn test_bad_update_reports_disconnected() {
        let (mut surface, _rx) = create_surface();
        surface.open(&res());
        let outputs = surface.handle_message(SyncMessage::update(res(), vec![0xff, 0xff, 0xff]));
        assert_eq!(
            outputs,
            vec![SurfaceOutput::Connected {
                resource: res(),
                connected: false
            }]
        );
    }

    #[test]
    fn test_pending_edit_flushed_before_inbound_update() {
        let (mut surface, mut rx) = create_surface();
        surface.open(&res());

        let host = TextDoc::new(res());
        host.insert(0, "hello").unwrap();
        surface.handle_message(SyncMessage::update(res(), host.export_delta().unwrap()));
        drain(&mut rx);

        // Typed, but the quiet period has not passed yet
        surface.input(&res(), "hello!", Instant::now());

        host.insert(0, ">> ").unwrap();
        let outputs =
            surface.handle_message(SyncMessage::update(res(), host.export_delta().unwrap()));

        let sent = drain(&mut rx);
        assert!(matches!(sent.as_slice(), [SyncMessage::Update { .. }]));
        assert!(outputs.contains(&SurfaceOutput::Content {
            resource: res(),
            content: ">> hello!".to_string()
        }));

        if let SyncMessage::Update { delta, .. } = &sent[0] {
            host.import_delta(delta, UpdateOrigin::Remote).unwrap();
        }
        assert_eq!(host.text(), ">> hello!");
    }

    #[test]
    fn test_flush_due_respects_deadline() {
        let (mut surface, mut rx) = create_surface();
        surface.open(&res());
        drain(&mut rx);

        let t0 = Instant::now();
        surface.input(&res(), "typed", t0);
        assert_eq!(surface.next_deadline(), Some(t0 + Duration::from_millis(100)));

        surface.flush_due(t0 + Duration::from_millis(50));
        assert!(drain(&mut rx).is_empty());

        surface.flush_due(t0 + Duration::from_millis(100));
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(surface.next_deadline().is_none());
    }

    #[test]
    fn test_reconnect_reinitializes() {
        let (mut surface, mut rx) = create_surface();
        surface.open(&res());
        drain(&mut rx);

        surface.reconnect();
        assert_eq!(drain(&mut rx), vec![SyncMessage::init(res())]);
    }

    #[test]
    fn test_host_restart_rebuilds_replica_and_replays_pending_edit() {
        let (mut surface, mut rx) = create_surface();
        surface.open(&res());

        let first_host = TextDoc::new(res());
        first_host.insert(0, "body").unwrap();
        surface.handle_message(SyncMessage::state_vector(res(), first_host.state_vector()));
        surface.handle_message(SyncMessage::update(res(), first_host.encode_state()));
        surface.input(&res(), "body!", Instant::now());
        drain(&mut rx);

        // Same file, new process: fresh replica under a new client id
        let host = TextDoc::new(res());
        host.insert(0, "body").unwrap();
        surface.reconnect();
        surface.handle_message(SyncMessage::state_vector(res(), host.state_vector()));
        assert!(surface.next_deadline().is_none());

        // Typing while the new replica catches up replaces the kept edit
        surface.input(&res(), "body!?", Instant::now());

        let outputs = surface.handle_message(SyncMessage::update(res(), host.encode_state()));
        assert!(outputs.contains(&SurfaceOutput::Content {
            resource: res(),
            content: "body".to_string()
        }));
        assert_eq!(surface.sync().docs().text(&res()).unwrap(), "body!?");

        for message in drain(&mut rx) {
            if let SyncMessage::Update { delta, .. } = message {
                host.import_delta(&delta, UpdateOrigin::Remote).unwrap();
            }
        }
        assert_eq!(host.text(), "body!?");
    }

    #[test]
    fn test_reconnect_to_same_host_keeps_replica() {
        let (mut surface, mut rx) = create_surface();
        surface.open(&res());

        let host = TextDoc::new(res());
        host.insert(0, "v1").unwrap();
        surface.handle_message(SyncMessage::state_vector(res(), host.state_vector()));
        surface.handle_message(SyncMessage::update(res(), host.encode_state()));

        host.insert(2, "+").unwrap();
        surface.reconnect();
        drain(&mut rx);
        surface.handle_message(SyncMessage::state_vector(res(), host.state_vector()));
        surface.handle_message(SyncMessage::update(res(), host.export_delta().unwrap()));

        assert_eq!(surface.sync().docs().text(&res()).unwrap(), "v1+");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_debounces_and_stops() {
        let (transport, mut outbound) = ChannelTransport::new();
        let sync = SyncManager::new(Arc::new(DocManager::new()), Arc::new(transport));
        let surface = RemoteSurface::new(sync, &Config::default());

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (_inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (output_tx, _output_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(surface.run(input_rx, inbound_rx, output_tx));

        input_tx.send(SurfaceInput::Open(res())).unwrap();
        assert_eq!(outbound.recv().await, Some(SyncMessage::init(res())));

        for content in ["a", "ab", "abc"] {
            input_tx
                .send(SurfaceInput::Edit {
                    resource: res(),
                    content: content.to_string(),
                })
                .unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        assert!(outbound.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let update = outbound.try_recv().unwrap();
        let peer = TextDoc::new(res());
        if let SyncMessage::Update { delta, .. } = update {
            peer.import_delta(&delta, UpdateOrigin::Remote).unwrap();
        }
        assert_eq!(peer.text(), "abc");
        assert!(outbound.try_recv().is_err());

        drop(input_tx);
        task.await.unwrap();
    }
}
