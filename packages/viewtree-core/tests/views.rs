use viewtree_core::{ClientEvent, Error, InputEvent, NodeId};
use viewtree_test_support::{node, view, TestHarness};

fn embedded_app() -> (TestHarness, viewtree_core::ConnectionId, viewtree_core::ConnectionId) {
    let mut h = TestHarness::new();
    let wm = h.service.embed_root("view://wm");
    h.service.create_node(wm, node(1, 1)).unwrap();
    h.service.add_node(wm, NodeId::ROOT, node(1, 1), 1).unwrap();
    let c2 = h.service.embed(wm, "view://app", &[node(1, 1)]).unwrap();
    h.drain(0);
    h.drain(1);
    (h, wm, c2)
}

#[test]
fn view_replacement_notifies_third_parties_that_see_the_node() {
    let (mut h, _wm, c2) = embedded_app();
    h.service.create_view(c2, view(2, 1)).unwrap();

    // connection 2 attaches its view to a node owned by connection 1;
    // the wm owns neither but sees the node
    h.service.set_view(c2, node(1, 1), view(2, 1)).unwrap();
    assert_eq!(
        h.drain(0),
        vec![ClientEvent::NodeViewReplaced {
            node: node(1, 1),
            new_view: Some(view(2, 1)),
            old_view: None,
        }]
    );
}

#[test]
fn reattaching_a_view_detaches_it_from_its_previous_node() {
    let (mut h, _wm, c2) = embedded_app();
    h.service.create_node(c2, node(2, 1)).unwrap();
    h.service.add_node(c2, node(1, 1), node(2, 1), 2).unwrap();
    h.service.create_view(c2, view(2, 1)).unwrap();
    h.service.set_view(c2, node(2, 1), view(2, 1)).unwrap();
    h.drain(0);

    h.service.set_view(c2, node(1, 1), view(2, 1)).unwrap();
    assert_eq!(h.service.node_view(node(2, 1)), None);
    assert_eq!(h.service.node_view(node(1, 1)), Some(view(2, 1)));
    let events = h.drain(0);
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        ClientEvent::NodeViewReplaced {
            node: node(2, 1),
            new_view: None,
            old_view: Some(view(2, 1)),
        }
    );
    assert_eq!(
        events[1],
        ClientEvent::NodeViewReplaced {
            node: node(1, 1),
            new_view: Some(view(2, 1)),
            old_view: None,
        }
    );
}

#[test]
fn deleting_a_view_detaches_but_never_cascades_to_the_node() {
    let (mut h, _wm, c2) = embedded_app();
    h.service.create_view(c2, view(2, 1)).unwrap();
    h.service.set_view(c2, node(1, 1), view(2, 1)).unwrap();
    h.drain(0);

    h.service.delete_view(c2, view(2, 1)).unwrap();
    assert!(!h.service.view_exists(view(2, 1)));
    assert!(h.service.node_exists(node(1, 1)));
    assert_eq!(h.service.node_view(node(1, 1)), None);

    let events = h.drain(0);
    assert!(events.contains(&ClientEvent::NodeViewReplaced {
        node: node(1, 1),
        new_view: None,
        old_view: Some(view(2, 1)),
    }));
    assert!(events.contains(&ClientEvent::ViewDeleted { view: view(2, 1) }));
}

#[test]
fn clearing_a_view_slot_keeps_the_view_alive() {
    let (mut h, _wm, c2) = embedded_app();
    h.service.create_view(c2, view(2, 1)).unwrap();
    h.service.set_view(c2, node(1, 1), view(2, 1)).unwrap();

    h.service
        .set_view(c2, node(1, 1), viewtree_core::ViewId::NONE)
        .unwrap();
    assert!(h.service.view_exists(view(2, 1)));
    assert_eq!(h.service.node_view(node(1, 1)), None);
}

#[test]
fn input_events_route_to_the_view_owner_and_are_wm_only() {
    let (mut h, wm, c2) = embedded_app();
    h.service.create_view(c2, view(2, 1)).unwrap();
    h.service.set_view(c2, node(1, 1), view(2, 1)).unwrap();
    h.drain(1);

    // only the window manager may dispatch
    let err = h
        .service
        .dispatch_view_input_event(c2, view(2, 1), InputEvent(vec![1]))
        .unwrap_err();
    assert!(matches!(err, Error::AccessDenied(_)));

    h.service
        .dispatch_view_input_event(wm, view(2, 1), InputEvent(vec![1, 2]))
        .unwrap();
    assert_eq!(
        h.drain(1),
        vec![ClientEvent::ViewInputEvent {
            view: view(2, 1),
            event: InputEvent(vec![1, 2]),
        }]
    );

    let err = h
        .service
        .dispatch_view_input_event(wm, view(2, 9), InputEvent(vec![]))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownId(_)));
}

#[test]
fn focus_requests_reach_the_platform_host() {
    let (mut h, wm, c2) = embedded_app();
    h.service.set_focus(wm, node(1, 1)).unwrap();
    h.service.set_focus(c2, node(1, 1)).unwrap();
    assert_eq!(*h.focus_requests.borrow(), vec![node(1, 1), node(1, 1)]);

    // a node the caller cannot see is not focusable
    h.service.create_node(wm, node(1, 2)).unwrap();
    h.service.add_node(wm, NodeId::ROOT, node(1, 2), 2).unwrap();
    assert!(matches!(
        h.service.set_focus(c2, node(1, 2)).unwrap_err(),
        Error::AccessDenied(_)
    ));
}
