use shelfmate_rust::catalog;
use shelfmate_rust::db;
use shelfmate_rust::favorites;

const SERVER: &str = "https://pantry.example";

#[test]
fn favorite_reconcile_unfavorite_roundtrip() {
    let temp = tempfile::tempdir().expect("tempdir");
    let app_dir = temp.path().join("shelfmate");
    let conn = db::open(&app_dir).expect("open db");

    db::upsert_server_connection(&conn, SERVER, Some("Home")).expect("register connection");

    let snapshot = catalog::parse_entity_snapshot(
        r#"[
            {"id": 1, "name": "Oat milk", "active": true},
            {"id": 2, "name": "Coffee beans", "active": true},
            {"id": 3, "name": "Rye bread", "active": false}
        ]"#,
    )
    .expect("parse snapshot");

    favorites::add_favorite(&conn, SERVER, "2").expect("favorite 2");
    favorites::add_favorite(&conn, SERVER, "1").expect("favorite 1");

    let list = favorites::reconcile(&conn, SERVER, &snapshot).expect("reconcile");
    let names: Vec<&str> = list.iter().map(|row| row.entity.name.as_str()).collect();
    // Quick-add order is favoriting order, not catalog order.
    assert_eq!(names, ["Coffee beans", "Oat milk"]);
    // Inactive entities still pass through untouched if favorited.
    assert!(list.iter().all(|row| row.entity.active));

    favorites::remove_favorite(&conn, SERVER, "2").expect("unfavorite 2");

    let list = favorites::reconcile(&conn, SERVER, &snapshot).expect("reconcile again");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].entity.id, "1");
    assert_eq!(list[0].favorite.entity_id, "1");

    // Favorites survive a reopen.
    drop(conn);
    let conn2 = db::open(&app_dir).expect("open db again");
    let rows = db::list_favorites_by_connection(&conn2, SERVER).expect("list favorites");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].entity_id, "1");
}

#[test]
fn readding_a_favorite_keeps_its_position() {
    let temp = tempfile::tempdir().expect("tempdir");
    let app_dir = temp.path().join("shelfmate");
    let conn = db::open(&app_dir).expect("open db");

    let first = favorites::add_favorite(&conn, SERVER, "1").expect("favorite 1");
    favorites::add_favorite(&conn, SERVER, "2").expect("favorite 2");
    let readded = favorites::add_favorite(&conn, SERVER, "1").expect("re-favorite 1");

    assert_eq!(first.sort_order, readded.sort_order);

    let rows = db::list_favorites_by_connection(&conn, SERVER).expect("list favorites");
    let ids: Vec<&str> = rows.iter().map(|r| r.entity_id.as_str()).collect();
    assert_eq!(ids, ["1", "2"]);
}
