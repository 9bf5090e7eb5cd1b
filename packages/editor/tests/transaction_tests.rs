use std::cell::RefCell;
use std::rc::Rc;

use vellum_editor::model::{Capabilities, NodeKey, NodeTypeId, Point, Selection};
use vellum_editor::{
    DeliveryPolicy, Editor, EditorConfig, EditorError, MutationReport, TypeRegistration,
};

fn text_type() -> NodeTypeId {
    NodeTypeId::new("text")
}

fn basic_config() -> EditorConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    EditorConfig::new("test")
        .with_node_type(TypeRegistration::new("text", Capabilities::text()))
        .with_node_type(TypeRegistration::new("paragraph", Capabilities::container()))
        .with_delivery(DeliveryPolicy::Immediate)
}

fn capture_errors(config: EditorConfig) -> (EditorConfig, Rc<RefCell<Vec<String>>>) {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    let config = config.with_error_handler(move |err| sink.borrow_mut().push(err.to_string()));
    (config, errors)
}

fn capture_reports(editor: &Editor) -> Rc<RefCell<Vec<MutationReport>>> {
    let reports = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reports);
    let _ = editor.register_mutation_listener(None, move |report| {
        sink.borrow_mut().push(report.clone());
    });
    reports
}

fn insert_text(editor: &Editor, text: &str) -> NodeKey {
    let slot = Rc::new(RefCell::new(None));
    let out = Rc::clone(&slot);
    let text = text.to_string();
    editor.update(move |ctx| {
        let root = ctx.root_key();
        let node = ctx.create_text(&text_type(), text)?;
        let key = ctx.insert_child(&root, usize::MAX, node)?;
        *out.borrow_mut() = Some(key);
        Ok(())
    });
    let key = slot.borrow_mut().take();
    key.expect("insert transaction did not commit")
}

#[test]
fn versions_advance_without_gaps() {
    let editor = Editor::new(basic_config()).unwrap();
    insert_text(&editor, "a");
    insert_text(&editor, "b");
    insert_text(&editor, "c");
    assert_eq!(editor.editor_state().version(), 3);
}

#[test]
fn updates_queued_during_a_mutator_coalesce_in_order() {
    let editor = Editor::new(basic_config()).unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    fn append(ctx: &mut vellum_editor::TransactionContext, text: &str) -> Result<(), EditorError> {
        let root = ctx.root_key();
        let node = ctx.create_text(&text_type(), text)?;
        ctx.insert_child(&root, usize::MAX, node)?;
        Ok(())
    }

    let o1 = Rc::clone(&order);
    let inner = editor.clone();
    editor.update(move |ctx| {
        o1.borrow_mut().push(1);
        append(ctx, "one")?;
        let o2 = Rc::clone(&o1);
        inner.update(move |ctx| {
            o2.borrow_mut().push(2);
            append(ctx, "two")
        });
        let o3 = Rc::clone(&o1);
        inner.update(move |ctx| {
            o3.borrow_mut().push(3);
            append(ctx, "three")
        });
        Ok(())
    });

    assert_eq!(*order.borrow(), vec![1, 2, 3]);
    // All three coalesced into one committed transaction.
    assert_eq!(editor.editor_state().version(), 1);
}

#[test]
fn inserting_a_leaf_reports_created_leaf_and_updated_root() {
    let editor = Editor::new(basic_config()).unwrap();
    let reports = capture_reports(&editor);

    let leaf = insert_text(&editor, "hello");
    let root = editor.editor_state().node_map().root_key().clone();

    let reports = reports.borrow();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.created.iter().collect::<Vec<_>>(), vec![&leaf]);
    assert_eq!(report.updated.iter().collect::<Vec<_>>(), vec![&root]);
    assert!(report.destroyed.is_empty());

    editor.read(|r| assert_eq!(r.len(), 2));
}

#[test]
fn merging_text_reports_one_destroyed_and_no_created() {
    let editor = Editor::new(basic_config()).unwrap();
    let foo = insert_text(&editor, "foo");
    let bar = insert_text(&editor, "bar");

    let reports = capture_reports(&editor);
    let into = foo.clone();
    let from = bar.clone();
    editor.update(move |ctx| ctx.merge_text(&into, &from));

    let reports = reports.borrow();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.created.is_empty());
    assert_eq!(report.destroyed.iter().collect::<Vec<_>>(), vec![&bar]);
    assert!(report.updated.contains(&foo));

    editor.read(|r| {
        assert_eq!(r.get(&foo).unwrap().text_content(), Some("foobar"));
        assert!(!r.contains(&bar));
    });
}

#[test]
fn mutation_report_sets_are_disjoint() {
    let editor = Editor::new(basic_config()).unwrap();
    let a = insert_text(&editor, "a");

    let reports = capture_reports(&editor);
    editor.update(move |ctx| {
        ctx.remove_node(&a)?;
        let root = ctx.root_key();
        let node = ctx.create_text(&text_type(), "b")?;
        ctx.insert_child(&root, 0, node)?;
        Ok(())
    });

    let reports = reports.borrow();
    let report = &reports[0];
    for key in &report.created {
        assert!(!report.updated.contains(key));
        assert!(!report.destroyed.contains(key));
    }
    for key in &report.updated {
        assert!(!report.destroyed.contains(key));
    }
}

#[test]
fn writing_identical_content_yields_an_empty_report() {
    let editor = Editor::new(basic_config()).unwrap();
    let leaf = insert_text(&editor, "same");

    let reports = capture_reports(&editor);
    editor.update(move |ctx| ctx.set_text(&leaf, "same"));

    let reports = reports.borrow();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_empty());
    // The commit itself still happened.
    assert_eq!(editor.editor_state().version(), 2);
}

#[test]
fn a_failed_mutator_rolls_the_transaction_back() {
    let (config, errors) = capture_errors(basic_config());
    let editor = Editor::new(config).unwrap();

    editor.update(|ctx| {
        let root = ctx.root_key();
        let node = ctx.create_text(&text_type(), "doomed")?;
        ctx.insert_child(&root, 0, node)?;
        Err(EditorError::Mutator("validation failed".into()))
    });

    assert_eq!(editor.editor_state().version(), 0);
    editor.read(|r| assert_eq!(r.len(), 1));
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("validation failed"));
}

#[test]
fn nodes_created_and_removed_in_one_transaction_never_surface() {
    let editor = Editor::new(basic_config()).unwrap();
    let reports = capture_reports(&editor);

    editor.update(|ctx| {
        let root = ctx.root_key();
        let node = ctx.create_text(&text_type(), "transient")?;
        let key = ctx.insert_child(&root, 0, node)?;
        ctx.remove_node(&key)?;
        Ok(())
    });

    let reports = reports.borrow();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_empty());
}

#[test]
fn transforms_run_to_a_fixpoint() {
    let config = EditorConfig::new("test")
        .with_node_type(
            TypeRegistration::new("text", Capabilities::text()).with_transform(|ctx, key| {
                let current = ctx
                    .node(key)?
                    .text_content()
                    .unwrap_or_default()
                    .to_string();
                let upper = current.to_uppercase();
                if upper != current {
                    ctx.set_text(key, upper)?;
                }
                Ok(())
            }),
        )
        .with_delivery(DeliveryPolicy::Immediate);
    let editor = Editor::new(config).unwrap();

    let leaf = insert_text(&editor, "hello");
    editor.read(|r| {
        assert_eq!(r.get(&leaf).unwrap().text_content(), Some("HELLO"));
    });
    assert_eq!(editor.editor_state().version(), 1);
}

#[test]
fn a_transform_chain_cascades_across_nodes() {
    // The text transform dirties its container, whose transform counts runs.
    let runs = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&runs);
    let config = EditorConfig::new("test")
        .with_node_type(TypeRegistration::new("text", Capabilities::text()))
        .with_node_type(
            TypeRegistration::new("paragraph", Capabilities::container()).with_transform(
                move |_ctx, _key| {
                    *counter.borrow_mut() += 1;
                    Ok(())
                },
            ),
        )
        .with_delivery(DeliveryPolicy::Immediate);
    let editor = Editor::new(config).unwrap();

    editor.update(|ctx| {
        let root = ctx.root_key();
        let para = ctx.create_element(&NodeTypeId::new("paragraph"))?;
        let para_key = ctx.insert_child(&root, 0, para)?;
        let leaf = ctx.create_text(&text_type(), "x")?;
        ctx.insert_child(&para_key, 0, leaf)?;
        Ok(())
    });

    assert_eq!(*runs.borrow(), 1);
}

#[test]
fn a_self_dirtying_transform_aborts_with_divergence() {
    let (config, errors) = capture_errors(
        EditorConfig::new("test")
            .with_node_type(
                TypeRegistration::new("text", Capabilities::text()).with_transform(|ctx, key| {
                    let current = ctx
                        .node(key)?
                        .text_content()
                        .unwrap_or_default()
                        .to_string();
                    ctx.set_text(key, format!("{current}!"))
                }),
            )
            .with_transform_pass_limit(3),
    );
    let editor = Editor::new(config).unwrap();

    editor.update(|ctx| {
        let root = ctx.root_key();
        let node = ctx.create_text(&text_type(), "ping")?;
        ctx.insert_child(&root, 0, node)?;
        Ok(())
    });

    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("converge"));
    // The whole transaction rolled back, including the insert.
    assert_eq!(editor.editor_state().version(), 0);
    editor.read(|r| assert_eq!(r.len(), 1));
}

#[test]
fn a_stale_selection_aborts_the_commit() {
    let (config, errors) = capture_errors(basic_config());
    let editor = Editor::new(config).unwrap();
    let leaf = insert_text(&editor, "hello");

    let target = leaf.clone();
    editor.update(move |ctx| {
        ctx.set_selection(Some(Selection::caret(Point::text(target.clone(), 0))));
        ctx.remove_node(&target)?;
        Ok(())
    });

    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("selection"));
    assert_eq!(editor.editor_state().version(), 1);
    editor.read(|r| assert!(r.contains(&leaf)));
}

#[test]
fn a_committed_selection_is_visible_on_the_state() {
    let editor = Editor::new(basic_config()).unwrap();
    let leaf = insert_text(&editor, "hello");

    let target = leaf.clone();
    editor.update(move |ctx| {
        ctx.set_selection(Some(Selection::caret(Point::text(target, 3))));
        Ok(())
    });

    let state = editor.editor_state();
    let selection = state.selection().expect("selection should have committed");
    assert!(selection.is_collapsed());
    assert_eq!(selection.anchor.key, leaf);
}

#[test]
fn marking_a_missing_node_dirty_fails() {
    let (config, errors) = capture_errors(basic_config());
    let editor = Editor::new(config).unwrap();

    editor.update(|ctx| ctx.mark_dirty(&NodeKey::fresh()));

    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("not found"));
    assert_eq!(editor.editor_state().version(), 0);
}

#[test]
fn replacement_rules_apply_at_creation() {
    let editor = Editor::new(
        basic_config().with_node_type(
            TypeRegistration::new("styled-text", Capabilities::text()).replaces("text"),
        ),
    )
    .unwrap();

    let leaf = insert_text(&editor, "hello");
    editor.read(|r| {
        assert_eq!(r.get(&leaf).unwrap().type_id().as_str(), "styled-text");
    });
}

#[test]
fn creating_an_unregistered_type_fails_the_transaction() {
    let (config, errors) = capture_errors(basic_config());
    let editor = Editor::new(config).unwrap();

    editor.update(|ctx| {
        let node = ctx.create_text(&NodeTypeId::new("bogus"), "x")?;
        let root = ctx.root_key();
        ctx.insert_child(&root, 0, node)?;
        Ok(())
    });

    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("unknown node type"));
    assert_eq!(editor.editor_state().version(), 0);
}
