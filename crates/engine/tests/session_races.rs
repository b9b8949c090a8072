mod common;

use common::{ScriptedSource, main_ids, session};
use serde_json::json;
use tabula_engine::{CommitOutcome, SearchMode};
use tabula_types::Filter;
use tabula_util::ApproximateOptions;

#[tokio::test]
async fn result_for_previous_session_never_reaches_the_new_one() {
    let source = ScriptedSource::new();
    let mut session = session(&source);
    session.select_form(11);
    let in_flight = session.prepare_tree_root_filter(5, "A").expect("request");

    session.select_form(12);
    session.load().await.expect("load new form");
    let before = session.view_model();

    let late = in_flight.fetch(source.as_ref()).await;
    assert_eq!(session.commit_filter(late).expect("commit"), CommitOutcome::Stale);

    let after = session.view_model();
    assert_eq!(before, after);
    assert!(session.filter().filters().is_empty());
    assert!(session.filter().tree_cache().is_empty());
    assert_eq!(main_ids(&session), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn result_arriving_after_close_is_dropped() {
    let source = ScriptedSource::new();
    let mut session = session(&source);
    session.select_form(11);
    let in_flight = session.prepare_load().expect("request");

    session.close();
    let late = in_flight.fetch(source.as_ref()).await;
    assert_eq!(session.commit_filter(late).expect("commit"), CommitOutcome::Stale);
    assert!(session.filter().main_view().is_none());
}

#[tokio::test]
async fn older_filter_cannot_overwrite_newer_one_that_landed_first() {
    let source = ScriptedSource::new();
    let mut session = session(&source);
    session.select_form(11);

    let older = session.prepare_nested_filter(5, "B").expect("request");
    let newer = session.prepare_nested_filter(5, "A").expect("request");
    let (older, newer) = tokio::join!(older.fetch(source.as_ref()), newer.fetch(source.as_ref()));

    assert_eq!(session.commit_filter(newer).expect("commit"), CommitOutcome::Committed);
    assert_eq!(session.commit_filter(older).expect("commit"), CommitOutcome::Stale);
    assert_eq!(session.filter().filters().to_filters(), vec![Filter::new(5, "A")]);
    assert_eq!(main_ids(&session), vec![1, 2, 4]);
}

#[tokio::test]
async fn older_filter_landing_first_is_then_superseded() {
    let source = ScriptedSource::new();
    let mut session = session(&source);
    session.select_form(11);

    let older = session.prepare_nested_filter(5, "B").expect("request");
    let newer = session.prepare_nested_filter(5, "A").expect("request");
    let older = older.fetch(source.as_ref()).await;
    let newer = newer.fetch(source.as_ref()).await;

    assert_eq!(session.commit_filter(older).expect("commit"), CommitOutcome::Committed);
    assert_eq!(main_ids(&session), vec![3]);
    assert_eq!(session.commit_filter(newer).expect("commit"), CommitOutcome::Committed);
    assert_eq!(main_ids(&session), vec![1, 2, 4]);
}

#[tokio::test]
async fn search_follows_the_committed_view() {
    let source = ScriptedSource::new();
    let mut session = session(&source);
    session.select_form(11);
    session.load().await.expect("load");

    session.set_search_query("CAROL");
    let found: Vec<usize> = session.visible_rows().expect("search").iter().map(|view| view.original_index).collect();
    assert_eq!(found, vec![2]);

    session.apply_nested_filter(5, "A").await.expect("filter");
    assert!(session.visible_rows().expect("search").is_empty());

    session.set_search_query("dabe");
    session.set_search_mode(SearchMode::Approximate(ApproximateOptions::default()));
    let found: Vec<usize> = session.visible_rows().expect("search").iter().map(|view| view.original_index).collect();
    assert_eq!(found, vec![2]);

    session.set_search_enabled(false);
    assert_eq!(session.visible_rows().expect("search").len(), 3);
}

#[tokio::test]
async fn view_model_exposes_plan_addressing_and_tree_state() {
    let source = ScriptedSource::new();
    let mut session = session(&source);
    session.select_form(11);
    session.load_table_meta(3).await.expect("meta");
    session.apply_tree_root_filter(5, "A").await.expect("tree root");

    let encoded = serde_json::to_value(session.view_model()).expect("serialize");
    assert_eq!(encoded["form_id"], json!(11));
    assert_eq!(encoded["phase"], json!("expanded"));
    assert_eq!(encoded["expanded_key"], json!("5-A"));
    assert_eq!(encoded["filters"], json!({"5": "A"}));
    assert_eq!(encoded["main"]["addressing"]["3:-1000003"], json!(2));
    assert_eq!(encoded["main"]["groups"][2]["labels"], json!(["Owner login"]));
    assert_eq!(encoded["main"]["rows"][0]["cells"], json!(["A", "B", "alice"]));
    assert_eq!(encoded["table_meta"]["hasUpdateQuery"], json!(true));
    assert_eq!(encoded["search"]["mode"], json!("exact"));

    let owner = session
        .filter()
        .main_view()
        .and_then(|snapshot| snapshot.plan.column_at(2).cloned())
        .expect("owner column");
    assert!(!session.can_edit(&owner));
    let region = session
        .filter()
        .main_view()
        .and_then(|snapshot| snapshot.plan.column_at(0).cloned())
        .expect("region column");
    assert!(session.can_edit(&region));
    let row = session.row_at(0).cloned().expect("row");
    assert_eq!(session.display_cell(&row, &owner), "alice");
    assert_eq!(session.editable_cell(&row, &region).as_deref(), Some("A"));
}
