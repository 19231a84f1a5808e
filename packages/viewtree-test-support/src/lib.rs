#![forbid(unsafe_code)]
//! Shared harness for viewtree service suites: recording client channels
//! and a connector that wires embedded clients to inspectable inboxes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use viewtree_core::{
    ClientChannel, ClientConnector, ClientEvent, ConnectionId, FocusHost, NodeId, ViewTreeService,
};

/// Inbox shared between a [`RecordingChannel`] handed to the service and
/// the test that inspects it.
pub type Inbox = Rc<RefCell<VecDeque<ClientEvent>>>;

/// Channel that appends every delivered event to a shared inbox.
pub struct RecordingChannel {
    inbox: Inbox,
}

impl RecordingChannel {
    pub fn new(inbox: Inbox) -> Self {
        Self { inbox }
    }
}

impl ClientChannel for RecordingChannel {
    fn deliver(&mut self, event: ClientEvent) {
        self.inbox.borrow_mut().push_back(event);
    }
}

/// Connector that creates a fresh inbox per embedded url and remembers
/// them in connection order for later inspection.
#[derive(Default)]
pub struct RecordingConnector {
    inboxes: Rc<RefCell<Vec<(String, Inbox)>>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the inbox list; clone before moving the connector
    /// into the service.
    pub fn inboxes(&self) -> Rc<RefCell<Vec<(String, Inbox)>>> {
        Rc::clone(&self.inboxes)
    }
}

impl ClientConnector for RecordingConnector {
    fn connect(&mut self, url: &str) -> Box<dyn ClientChannel> {
        let inbox: Inbox = Rc::new(RefCell::new(VecDeque::new()));
        self.inboxes
            .borrow_mut()
            .push((url.to_string(), Rc::clone(&inbox)));
        Box::new(RecordingChannel::new(inbox))
    }
}

/// Focus host that records every focus request.
#[derive(Default)]
pub struct RecordingFocusHost {
    requests: Rc<RefCell<Vec<NodeId>>>,
}

impl RecordingFocusHost {
    pub fn requests(&self) -> Rc<RefCell<Vec<NodeId>>> {
        Rc::clone(&self.requests)
    }
}

impl FocusHost for RecordingFocusHost {
    fn focus(&mut self, node: NodeId) {
        self.requests.borrow_mut().push(node);
    }
}

/// A service plus handles to every embedded client's inbox.
pub struct TestHarness {
    pub service: ViewTreeService,
    inboxes: Rc<RefCell<Vec<(String, Inbox)>>>,
    pub focus_requests: Rc<RefCell<Vec<NodeId>>>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        let connector = RecordingConnector::new();
        let inboxes = connector.inboxes();
        let focus_host = RecordingFocusHost::default();
        let focus_requests = focus_host.requests();
        Self {
            service: ViewTreeService::new(Box::new(connector), Box::new(focus_host)),
            inboxes,
            focus_requests,
        }
    }

    /// Drains every pending event for the connection embedded `index`-th
    /// (0 is the window manager).
    pub fn drain(&self, index: usize) -> Vec<ClientEvent> {
        let inboxes = self.inboxes.borrow();
        let (_, inbox) = inboxes.get(index).expect("no such embedded client");
        // collect before returning so the RefMut drops inside the borrow
        // of the inbox list
        let events: Vec<ClientEvent> = inbox.borrow_mut().drain(..).collect();
        events
    }

    /// Url the `index`-th client was embedded at.
    pub fn embedded_url(&self, index: usize) -> String {
        self.inboxes.borrow()[index].0.clone()
    }

    pub fn embedded_count(&self) -> usize {
        self.inboxes.borrow().len()
    }
}

/// Shorthand constructors used across the suites.
pub fn node(connection: u16, local: u16) -> NodeId {
    NodeId::new(ConnectionId(connection), local)
}

pub fn view(connection: u16, local: u16) -> viewtree_core::ViewId {
    viewtree_core::ViewId::new(ConnectionId(connection), local)
}
