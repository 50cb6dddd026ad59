//! Integration tests for two-sided sync sessions

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use codesync_core::config::Config;
use codesync_core::crdt::{
    DocManager, ResourceId, SyncManager, SyncMessage, SyncState, TextDoc, UpdateOrigin,
};
use codesync_core::diff::{TextChange, apply_changes};
use codesync_core::error::{Result, SyncError};
use codesync_core::host::{EditorSink, Host};
use codesync_core::surface::{RemoteSurface, SurfaceOutput};
use codesync_core::transport::{ChannelTransport, decode_line, encode_line};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

/// One side of a session with its outbound queue (simulates the channel)
struct Peer {
    sync: SyncManager,
    outbound: UnboundedReceiver<SyncMessage>,
}

impl Peer {
    fn new() -> Self {
        let (transport, outbound) = ChannelTransport::new();
        Self {
            sync: SyncManager::new(Arc::new(DocManager::new()), Arc::new(transport)),
            outbound,
        }
    }

    fn take_outbound(&mut self) -> Vec<SyncMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            out.push(msg);
        }
        out
    }

    fn text(&self, resource: &ResourceId) -> String {
        self.sync.docs().text(resource).unwrap()
    }
}

/// Send every message through the JSON-lines codec, as a real pipe would.
fn over_wire(message: &SyncMessage) -> SyncMessage {
    let line = encode_line(message).unwrap();
    decode_line(&line).unwrap().unwrap()
}

fn deliver(from: &mut Peer, to: &Peer) -> usize {
    let messages = from.take_outbound();
    let count = messages.len();
    for message in messages {
        to.sync.handle_message(over_wire(&message)).unwrap();
    }
    count
}

fn pump(a: &mut Peer, b: &mut Peer) {
    for _ in 0..50 {
        if deliver(a, b) + deliver(b, a) == 0 {
            return;
        }
    }
    panic!("handshake did not settle");
}

fn res(path: &str) -> ResourceId {
    ResourceId::code(path)
}

#[test]
fn test_remote_joins_host_with_content() {
    let mut host = Peer::new();
    let mut remote = Peer::new();
    let r = res("main.ts");

    host.sync.docs().get(&r).set_content("const x = 1;").unwrap();
    host.sync.announce(&r);
    remote.sync.open(&r);
    pump(&mut host, &mut remote);

    assert_eq!(remote.text(&r), "const x = 1;");
    assert!(host.sync.is_synced(&r));
    assert!(remote.sync.is_synced(&r));
}

#[test]
fn test_init_from_remote_only() {
    let mut host = Peer::new();
    let mut remote = Peer::new();
    let r = res("main.ts");

    host.sync.docs().get(&r).set_content("host text").unwrap();
    remote.sync.open(&r);
    pump(&mut host, &mut remote);

    assert_eq!(remote.text(&r), "host text");
    assert_eq!(host.sync.state(&r), SyncState::Synced);
    assert_eq!(remote.sync.state(&r), SyncState::Synced);
}

#[test]
fn test_bidirectional_catch_up_after_offline_edits() {
    let mut host = Peer::new();
    let mut remote = Peer::new();
    let r = res("notes.md");

    host.sync.docs().get(&r).set_content("shared line\n").unwrap();
    remote.sync.open(&r);
    pump(&mut host, &mut remote);

    // Channel goes down: edits are made and their updates are lost
    let host_doc = host.sync.docs().get(&r);
    let remote_doc = remote.sync.docs().get(&r);
    host_doc.insert(0, "# title\n").unwrap();
    host.sync.send_local_update(&r);
    remote_doc.insert(remote_doc.char_len(), "remote line\n").unwrap();
    remote.sync.send_local_update(&r);
    host.take_outbound();
    remote.take_outbound();

    // Channel rebuilt
    host.sync.reset();
    remote.sync.reset();
    remote.sync.open(&r);
    pump(&mut host, &mut remote);

    assert_eq!(host.text(&r), "# title\nshared line\nremote line\n");
    assert_eq!(remote.text(&r), host.text(&r));
}

#[test]
fn test_live_updates_after_handshake() {
    let mut host = Peer::new();
    let mut remote = Peer::new();
    let r = res("a.ts");

    remote.sync.open(&r);
    pump(&mut host, &mut remote);

    host.sync.docs().get(&r).insert(0, "abc").unwrap();
    host.sync.send_local_update(&r);
    pump(&mut host, &mut remote);
    assert_eq!(remote.text(&r), "abc");

    remote.sync.docs().get(&r).delete(1, 1).unwrap();
    remote.sync.send_local_update(&r);
    pump(&mut host, &mut remote);
    assert_eq!(host.text(&r), "ac");
}

#[test]
fn test_concurrent_inserts_converge_in_either_order() {
    let x = TextDoc::new(res("s6.ts"));
    let y = TextDoc::new(res("s6.ts"));
    x.insert(0, "foo").unwrap();
    y.insert(0, "bar").unwrap();
    let dx = x.export_delta().unwrap();
    let dy = y.export_delta().unwrap();

    // X sees its own edit first, Y sees X's edit before its own in a fresh replica
    x.import_delta(&dy, UpdateOrigin::Remote).unwrap();
    let z = TextDoc::new(res("s6.ts"));
    z.import_delta(&dx, UpdateOrigin::Remote).unwrap();
    z.import_delta(&dy, UpdateOrigin::Remote).unwrap();
    y.import_delta(&dx, UpdateOrigin::Remote).unwrap();

    assert_eq!(x.text(), y.text());
    assert_eq!(x.text(), z.text());
    assert!(x.text() == "foobar" || x.text() == "barfoo");
}

#[test]
fn test_duplicated_and_reordered_updates() {
    let source = TextDoc::new(res("dup.ts"));
    source.insert(0, "one ").unwrap();
    let first = source.export_delta().unwrap();
    source.insert(4, "two").unwrap();
    let second = source.export_delta().unwrap();

    let replica = TextDoc::new(res("dup.ts"));
    replica.import_delta(&second, UpdateOrigin::Remote).unwrap();
    replica.import_delta(&first, UpdateOrigin::Remote).unwrap();
    replica.import_delta(&first, UpdateOrigin::Remote).unwrap();
    replica.import_delta(&second, UpdateOrigin::Remote).unwrap();

    assert_eq!(replica.text(), "one two");
}

#[test]
fn test_resources_multiplexed_on_one_channel() {
    let mut host = Peer::new();
    let mut remote = Peer::new();
    let a = res("a.ts");
    let b = res("b.ts");

    host.sync.docs().get(&a).set_content("AAA").unwrap();
    host.sync.docs().get(&b).set_content("BBB").unwrap();
    remote.sync.open(&a);
    remote.sync.open(&b);
    pump(&mut host, &mut remote);

    assert_eq!(remote.text(&a), "AAA");
    assert_eq!(remote.text(&b), "BBB");

    remote.sync.close(&a);
    assert!(!remote.sync.docs().is_loaded(&a));
    assert_eq!(remote.text(&b), "BBB");
}

#[test]
fn test_reopen_after_host_restart_does_not_duplicate() {
    let mut host = Peer::new();
    let mut remote = Peer::new();
    let r = res("restart.ts");

    host.sync.docs().get(&r).set_content("body").unwrap();
    remote.sync.open(&r);
    pump(&mut host, &mut remote);

    // Host process restarts with a fresh replica seeded from disk
    let mut host = Peer::new();
    host.sync.docs().get(&r).set_content("body").unwrap();

    remote.sync.close(&r);
    remote.sync.open(&r);
    pump(&mut host, &mut remote);

    assert_eq!(remote.text(&r), "body");
    assert_eq!(host.text(&r), "body");
}

#[test]
fn test_malformed_update_leaves_session_usable() {
    let mut host = Peer::new();
    let mut remote = Peer::new();
    let r = res("bad.ts");

    host.sync.docs().get(&r).set_content("good").unwrap();
    remote.sync.open(&r);
    pump(&mut host, &mut remote);

    let err = remote
        .sync
        .handle_message(SyncMessage::update(r.clone(), vec![0xff, 0xff, 0xff]))
        .unwrap_err();
    assert!(matches!(err, SyncError::Crdt(_)));
    assert_eq!(remote.text(&r), "good");

    host.sync.docs().get(&r).insert(4, "!").unwrap();
    host.sync.send_local_update(&r);
    pump(&mut host, &mut remote);
    assert_eq!(remote.text(&r), "good!");
}

// ============================================================================
// Host and remote surface drivers together
// ============================================================================

#[derive(Default)]
struct MockEditor {
    buffers: Mutex<HashMap<ResourceId, String>>,
}

impl EditorSink for MockEditor {
    fn current_text(&self, resource: &ResourceId) -> Option<String> {
        self.buffers.lock().unwrap().get(resource).cloned()
    }

    fn apply_edits(&self, resource: &ResourceId, changes: &[TextChange]) -> Result<()> {
        let mut buffers = self.buffers.lock().unwrap();
        let buffer = buffers
            .get_mut(resource)
            .ok_or_else(|| SyncError::UnknownResource(resource.clone()))?;
        apply_changes(buffer, changes)
    }

    fn replace_all(&self, resource: &ResourceId, content: &str) -> Result<()> {
        self.buffers
            .lock()
            .unwrap()
            .insert(resource.clone(), content.to_string());
        Ok(())
    }
}

struct Session {
    host: Host,
    host_out: UnboundedReceiver<SyncMessage>,
    editor: Arc<MockEditor>,
    surface: RemoteSurface,
    surface_out: UnboundedReceiver<SyncMessage>,
    rendered: HashMap<ResourceId, String>,
}

impl Session {
    fn new() -> Self {
        let (host_transport, host_out) = ChannelTransport::new();
        let (surface_transport, surface_out) = ChannelTransport::new();
        let editor = Arc::new(MockEditor::default());
        let host = Host::new(
            SyncManager::new(Arc::new(DocManager::new()), Arc::new(host_transport)),
            Arc::clone(&editor) as Arc<dyn EditorSink>,
        );
        let surface = RemoteSurface::new(
            SyncManager::new(Arc::new(DocManager::new()), Arc::new(surface_transport)),
            &Config::default(),
        );
        Self {
            host,
            host_out,
            editor,
            surface,
            surface_out,
            rendered: HashMap::new(),
        }
    }

    /// Replace the host with a fresh process sharing the same editor.
    fn restart_host(&mut self) {
        let (transport, host_out) = ChannelTransport::new();
        self.host = Host::new(
            SyncManager::new(Arc::new(DocManager::new()), Arc::new(transport)),
            Arc::clone(&self.editor) as Arc<dyn EditorSink>,
        );
        self.host_out = host_out;
    }

    /// The user types in the host editor.
    fn type_in_editor(&self, resource: &ResourceId, content: &str) {
        self.editor
            .buffers
            .lock()
            .unwrap()
            .insert(resource.clone(), content.to_string());
        self.host.editor_changed(resource, content).unwrap();
    }

    fn pump(&mut self) {
        for _ in 0..50 {
            let mut moved = 0;
            while let Ok(msg) = self.host_out.try_recv() {
                moved += 1;
                for out in self.surface.handle_message(over_wire(&msg)) {
                    if let SurfaceOutput::Content { resource, content } = out {
                        self.rendered.insert(resource, content);
                    }
                }
            }
            while let Ok(msg) = self.surface_out.try_recv() {
                moved += 1;
                self.host.handle_message(over_wire(&msg)).unwrap();
            }
            if moved == 0 {
                return;
            }
        }
        panic!("session did not settle");
    }
}

#[test]
fn test_editor_and_surface_stay_in_sync() {
    let mut session = Session::new();
    let r = res("src/app.ts");

    session
        .editor
        .buffers
        .lock()
        .unwrap()
        .insert(r.clone(), "let a = 1;".to_string());
    session.host.open(&r, "let a = 1;").unwrap();
    session.surface.open(&r);
    session.pump();
    assert_eq!(session.rendered[&r], "let a = 1;");

    // Typing in the surface reaches the editor after the quiet period
    let t0 = Instant::now();
    session.surface.input(&r, "let a = 12;", t0);
    session.surface.input(&r, "let a = 123;", t0);
    session.surface.flush_due(t0 + Config::default().debounce());
    session.pump();
    assert_eq!(session.editor.current_text(&r).unwrap(), "let a = 123;");

    // The editor echoes its new content back; nothing is sent
    assert!(!session.host.editor_changed(&r, "let a = 123;").unwrap());

    // Typing in the editor reaches the surface
    session.type_in_editor(&r, "let a = 123;\nlet b = 2;");
    session.pump();
    assert_eq!(session.rendered[&r], "let a = 123;\nlet b = 2;");
}

#[test]
fn test_concurrent_edits_from_both_sides() {
    let mut session = Session::new();
    let r = res("race.ts");

    session
        .editor
        .buffers
        .lock()
        .unwrap()
        .insert(r.clone(), "middle".to_string());
    session.host.open(&r, "middle").unwrap();
    session.surface.open(&r);
    session.pump();

    // Surface has a pending edit when the host's edit arrives
    session.surface.input(&r, "middle end", Instant::now());
    session.type_in_editor(&r, "start middle");
    session.pump();

    let host_text = session.host.sync().docs().text(&r).unwrap();
    let surface_text = session.surface.sync().docs().text(&r).unwrap();
    assert_eq!(host_text, "start middle end");
    assert_eq!(surface_text, host_text);
    assert_eq!(session.editor.current_text(&r).unwrap(), host_text);
}

#[test]
fn test_surface_reconnect_catches_up() {
    let mut session = Session::new();
    let r = res("flaky.ts");

    session.host.open(&r, "v1").unwrap();
    session.surface.open(&r);
    session.pump();

    // Host edits while the channel is down
    session.host.editor_changed(&r, "v2").unwrap();
    while session.host_out.try_recv().is_ok() {}

    session.host.reconnect();
    session.surface.reconnect();
    session.pump();

    assert_eq!(session.surface.sync().docs().text(&r).unwrap(), "v2");
    assert_eq!(session.rendered[&r], "v2");
}

#[test]
fn test_host_restart_does_not_duplicate_content() {
    let mut session = Session::new();
    let r = res("body.ts");

    session
        .editor
        .buffers
        .lock()
        .unwrap()
        .insert(r.clone(), "body".to_string());
    session.host.open(&r, "body").unwrap();
    session.surface.open(&r);
    session.pump();
    assert_eq!(session.rendered[&r], "body");

    // Host process restarts and seeds a new replica from the same file
    session.restart_host();
    session.host.open(&r, "body").unwrap();
    session.surface.reconnect();
    session.pump();

    assert_eq!(session.host.sync().docs().text(&r).unwrap(), "body");
    assert_eq!(session.surface.sync().docs().text(&r).unwrap(), "body");
    assert_eq!(session.editor.current_text(&r).unwrap(), "body");
    assert_eq!(session.rendered[&r], "body");

    // The rebuilt session keeps working both ways
    session.type_in_editor(&r, "body;");
    session.pump();
    assert_eq!(session.rendered[&r], "body;");

    let t0 = Instant::now();
    session.surface.input(&r, "// body;", t0);
    session.surface.flush_due(t0 + Config::default().debounce());
    session.pump();
    assert_eq!(session.editor.current_text(&r).unwrap(), "// body;");
}

#[test]
fn test_editor_save_before_remote_update_is_kept() {
    let mut session = Session::new();
    let r = res("save.ts");

    session
        .editor
        .buffers
        .lock()
        .unwrap()
        .insert(r.clone(), "abc".to_string());
    session.host.open(&r, "abc").unwrap();
    session.surface.open(&r);
    session.pump();

    // Saved in the editor but not reported before the surface's edit lands
    session
        .editor
        .buffers
        .lock()
        .unwrap()
        .insert(r.clone(), "abc LOCAL".to_string());
    let t0 = Instant::now();
    session.surface.input(&r, "Rabc", t0);
    session.surface.flush_due(t0 + Config::default().debounce());
    session.pump();

    assert_eq!(session.editor.current_text(&r).unwrap(), "Rabc LOCAL");
    assert_eq!(session.surface.sync().docs().text(&r).unwrap(), "Rabc LOCAL");
    assert_eq!(session.rendered[&r], "Rabc LOCAL");
}
