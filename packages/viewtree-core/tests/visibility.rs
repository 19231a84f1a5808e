use viewtree_core::{ClientEvent, NodeId};
use viewtree_test_support::{node, TestHarness};

/// wm owns: root -> (1,1) -> (1,11), root -> (1,2); connection 2 embedded
/// with roots = {(1,1)}.
fn embedded_pair() -> (TestHarness, viewtree_core::ConnectionId, viewtree_core::ConnectionId) {
    let mut h = TestHarness::new();
    let wm = h.service.embed_root("view://wm");
    h.service.create_node(wm, node(1, 1)).unwrap();
    h.service.create_node(wm, node(1, 11)).unwrap();
    h.service.create_node(wm, node(1, 2)).unwrap();
    h.service.add_node(wm, NodeId::ROOT, node(1, 1), 1).unwrap();
    h.service.add_node(wm, node(1, 1), node(1, 11), 2).unwrap();
    h.service.add_node(wm, NodeId::ROOT, node(1, 2), 3).unwrap();
    let c2 = h.service.embed(wm, "view://app", &[node(1, 1)]).unwrap();
    h.drain(0);
    h.drain(1);
    (h, wm, c2)
}

#[test]
fn get_node_tree_returns_the_visible_slice_only() {
    let (mut h, _wm, c2) = embedded_pair();

    let tree = h.service.get_node_tree(c2, node(1, 1)).unwrap();
    let ids: Vec<_> = tree.iter().map(|r| r.node).collect();
    assert_eq!(ids, vec![node(1, 1), node(1, 11)]);
    // the parent of the granted root is outside connection 2's world
    assert_eq!(tree[0].parent, None);
    assert_eq!(tree[1].parent, Some(node(1, 1)));

    // the global root is invisible: empty result, not an error
    assert!(h.service.get_node_tree(c2, NodeId::ROOT).unwrap().is_empty());
}

#[test]
fn node_leaving_the_visible_subtree_is_reported_deleted() {
    let (mut h, wm, _c2) = embedded_pair();

    // wm moves (1,11) under (1,2), outside connection 2's roots. The node
    // still exists server-side.
    h.service.add_node(wm, node(1, 2), node(1, 11), 4).unwrap();
    assert_eq!(
        h.drain(1),
        vec![ClientEvent::NodeDeleted {
            node: node(1, 11),
            change_id: 5
        }]
    );
    assert!(h.service.node_exists(node(1, 11)));

    // moving it back disclosed it again with full records
    h.service.add_node(wm, node(1, 1), node(1, 11), 5).unwrap();
    let events = h.drain(1);
    assert_eq!(events.len(), 1);
    match &events[0] {
        ClientEvent::NodeHierarchyChanged {
            node: n,
            new_parent,
            old_parent,
            change_id,
            disclosed,
        } => {
            assert_eq!(*n, node(1, 11));
            assert_eq!(*new_parent, Some(node(1, 1)));
            // (1,2) was never disclosed to connection 2
            assert_eq!(*old_parent, None);
            assert_eq!(*change_id, 6);
            assert_eq!(disclosed.len(), 1);
            assert_eq!(disclosed[0].node, node(1, 11));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn subtree_moving_into_view_is_disclosed_with_descendants() {
    let (mut h, wm, _c2) = embedded_pair();

    h.service.create_node(wm, node(1, 21)).unwrap();
    h.service.create_node(wm, node(1, 22)).unwrap();
    h.service.add_node(wm, node(1, 21), node(1, 22), 4).unwrap();
    h.drain(1);

    h.service.add_node(wm, node(1, 1), node(1, 21), 5).unwrap();
    let events = h.drain(1);
    assert_eq!(events.len(), 1);
    match &events[0] {
        ClientEvent::NodeHierarchyChanged {
            node: n, disclosed, ..
        } => {
            assert_eq!(*n, node(1, 21));
            let ids: Vec<_> = disclosed.iter().map(|r| r.node).collect();
            assert_eq!(ids, vec![node(1, 21), node(1, 22)]);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn moves_within_visible_territory_need_no_disclosure() {
    let (mut h, wm, _c2) = embedded_pair();

    h.service.remove_node_from_parent(wm, node(1, 11), 4).unwrap();
    // (1,11) is now parentless and invisible to connection 2
    assert_eq!(
        h.drain(1),
        vec![ClientEvent::NodeDeleted {
            node: node(1, 11),
            change_id: 5
        }]
    );

    // reattach, then move inside the visible subtree: the second move
    // discloses nothing new
    h.service.add_node(wm, node(1, 1), node(1, 11), 5).unwrap();
    h.drain(1);
    h.service.create_node(wm, node(1, 12)).unwrap();
    h.service.add_node(wm, node(1, 1), node(1, 12), 6).unwrap();
    h.drain(1);
    h.service.add_node(wm, node(1, 12), node(1, 11), 7).unwrap();
    let events = h.drain(1);
    match &events[0] {
        ClientEvent::NodeHierarchyChanged {
            new_parent,
            old_parent,
            disclosed,
            ..
        } => {
            assert_eq!(*new_parent, Some(node(1, 12)));
            assert_eq!(*old_parent, Some(node(1, 1)));
            assert!(disclosed.is_empty());
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn bounds_changes_reach_only_connections_that_know_the_node() {
    let (mut h, wm, _c2) = embedded_pair();
    let rect = viewtree_core::Rect::new(5, 5, 100, 50);

    h.service.set_node_bounds(wm, node(1, 11), rect).unwrap();
    assert_eq!(
        h.drain(1),
        vec![ClientEvent::NodeBoundsChanged {
            node: node(1, 11),
            old: viewtree_core::Rect::ZERO,
            new: rect
        }]
    );

    // (1,2) was never disclosed to connection 2: silence, not even a
    // counter notice, since bounds changes retain the counter
    h.service.set_node_bounds(wm, node(1, 2), rect).unwrap();
    assert!(h.drain(1).is_empty());
}
