use viewtree_core::{ClientEvent, NodeId};
use viewtree_test_support::{node, view, TestHarness};

/// wm plus an embedded app (connection 2) owning two nodes under (1,1)
/// and a view attached to (2,1).
fn populated() -> (TestHarness, viewtree_core::ConnectionId, viewtree_core::ConnectionId) {
    let mut h = TestHarness::new();
    let wm = h.service.embed_root("view://wm");
    h.service.create_node(wm, node(1, 1)).unwrap();
    h.service.add_node(wm, NodeId::ROOT, node(1, 1), 1).unwrap();
    let c2 = h.service.embed(wm, "view://app", &[node(1, 1)]).unwrap();

    h.service.create_node(c2, node(2, 1)).unwrap();
    h.service.create_node(c2, node(2, 2)).unwrap();
    h.service.add_node(c2, node(1, 1), node(2, 1), 2).unwrap();
    h.service.add_node(c2, node(2, 1), node(2, 2), 3).unwrap();
    h.service.create_view(c2, view(2, 7)).unwrap();
    h.service.set_view(c2, node(2, 1), view(2, 7)).unwrap();
    h.drain(0);
    h.drain(1);
    (h, wm, c2)
}

#[test]
fn closing_a_connection_tears_down_everything_it_owned() {
    let (mut h, _wm, c2) = populated();

    h.service.close_connection(c2).unwrap();

    assert!(!h.service.has_connection(c2));
    assert!(!h.service.node_exists(node(2, 1)));
    assert!(!h.service.node_exists(node(2, 2)));
    assert!(!h.service.view_exists(view(2, 7)));
    assert_eq!(h.service.node_children(node(1, 1)).unwrap(), &[] as &[NodeId]);
    // one final transaction moved the counter once
    assert_eq!(h.service.next_change_id(), 5);
}

#[test]
fn survivors_hear_about_every_torn_down_entity() {
    let (mut h, _wm, c2) = populated();

    h.service.close_connection(c2).unwrap();
    let events = h.drain(0);

    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::ViewDeleted { view: v } if *v == view(2, 7))));
    assert!(events.iter().any(
        |e| matches!(e, ClientEvent::NodeViewReplaced { node: n, new_view: None, .. } if *n == node(2, 1))
    ));
    for n in [node(2, 1), node(2, 2)] {
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::NodeDeleted { node: d, .. } if *d == n)));
    }
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::ConnectionClosed { connection } if *connection == c2)));
}

#[test]
fn hidden_survivors_get_a_single_counter_notice() {
    let (mut h, wm, c2) = populated();
    // third connection rooted at an unrelated subtree
    h.service.create_node(wm, node(1, 5)).unwrap();
    h.service.add_node(wm, NodeId::ROOT, node(1, 5), 4).unwrap();
    h.service.embed(wm, "view://other", &[node(1, 5)]).unwrap();
    h.drain(2);

    h.service.close_connection(c2).unwrap();
    let events = h.drain(2);
    let advances = events
        .iter()
        .filter(|e| matches!(e, ClientEvent::ChangeIdAdvanced { .. }))
        .count();
    assert_eq!(advances, 1);
    assert!(events
        .iter()
        .all(|e| !matches!(e, ClientEvent::NodeDeleted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::ConnectionClosed { connection } if *connection == c2)));
}

#[test]
fn deletion_notice_stands_in_for_the_counter_notice() {
    let mut h = TestHarness::new();
    let wm = h.service.embed_root("view://wm");
    h.service.create_node(wm, node(1, 1)).unwrap();
    h.service.add_node(wm, NodeId::ROOT, node(1, 1), 1).unwrap();
    let c2 = h.service.embed(wm, "view://app", &[node(1, 1)]).unwrap();
    // (2,1) is attached and visible to the third connection; (2,2) stays
    // detached and undisclosed
    h.service.create_node(c2, node(2, 1)).unwrap();
    h.service.create_node(c2, node(2, 2)).unwrap();
    h.service.add_node(c2, node(1, 1), node(2, 1), 2).unwrap();
    h.service.embed(wm, "view://other", &[node(1, 1)]).unwrap();
    h.drain(2);

    h.service.close_connection(c2).unwrap();
    let events = h.drain(2);
    // the NodeDeleted for (2,1) already carries the new counter, so the
    // invisible (2,2) deletion in the same transaction adds nothing
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::NodeDeleted { node: n, .. } if *n == node(2, 1))));
    assert!(events
        .iter()
        .all(|e| !matches!(e, ClientEvent::ChangeIdAdvanced { .. })));
}

#[test]
fn creator_links_are_cleared_when_the_creator_goes_away() {
    let (mut h, wm, c2) = populated();
    // connection 3 is embedded by connection 2
    let c3 = h.service.embed(c2, "view://nested", &[node(2, 2)]).unwrap();
    h.drain(2);

    h.service.close_connection(c2).unwrap();

    // c3 survives, its subtree root was deleted with its creator
    assert!(h.service.has_connection(c3));
    let events = h.drain(2);
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::NodeDeleted { node: n, .. } if *n == node(2, 2))));
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::ConnectionClosed { connection } if *connection == c2)));

    // a fresh embed by wm does not resurrect the dead creator/url pair
    h.service.create_node(wm, node(1, 9)).unwrap();
    let next = h
        .service
        .embed(wm, "view://nested", &[node(1, 9)])
        .unwrap();
    assert_ne!(next, c3);
}
