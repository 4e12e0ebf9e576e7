//! Integration tests for the reconciler: drift repair after dropped
//! events, restarts, and store tampering.

mod common;

use atriumd::db::RoomRecord;
use atriumd::platform::{ChannelId, GuildId, UserId};
use chrono::Utc;
use common::{GUILD, SPAWN, TestHarness};

#[tokio::test]
async fn missing_session_is_opened_for_a_present_member() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");
    h.platform.add_channel(500, "Orbit", 3);

    // The JOIN happened while the process was down: the platform sees
    // the user, the store has nothing.
    h.platform.occupy(1, 500);

    let report = h
        .app
        .reconciler()
        .run_once()
        .await
        .unwrap()
        .expect("pass ran");
    assert_eq!(report.sessions_opened, 1);

    let open = h
        .app
        .db()
        .sessions()
        .open_session_for_user(UserId(1), h.guild)
        .await
        .unwrap()
        .expect("session repaired");
    assert_eq!(open.channel_id, ChannelId(500));

    // A second pass opens nothing more.
    let report = h.app.reconciler().run_once().await.unwrap().unwrap();
    assert_eq!(report.sessions_opened, 0);
    assert_eq!(
        h.app
            .db()
            .sessions()
            .active_members_count(ChannelId(500))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn orphaned_session_is_closed_when_the_user_is_gone() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");
    h.platform.add_channel(500, "Orbit", 3);

    // The LEAVE was dropped: the store says present, the platform says gone.
    h.app
        .db()
        .sessions()
        .open_session(UserId(1), h.guild, ChannelId(500), "Orbit", Utc::now())
        .await
        .unwrap();

    let report = h.app.reconciler().run_once().await.unwrap().unwrap();
    assert_eq!(report.sessions_closed, 1);
    assert!(
        h.app
            .db()
            .sessions()
            .open_session_for_user(UserId(1), h.guild)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn sessions_on_dead_channels_are_closed_and_rows_retired() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");

    // A room the platform no longer has, with a row and an open session.
    h.app
        .db()
        .channels()
        .upsert_channel(&RoomRecord {
            id: ChannelId(600),
            guild_id: GuildId(GUILD),
            name: "Ghost Room".to_string(),
            position: 1,
            is_user_room: true,
            spawn_id: Some(ChannelId(SPAWN)),
            owner_id: None,
            owner_since: None,
            previous_owner_id: None,
            active: true,
            member_count: 1,
        })
        .await
        .unwrap();
    h.app
        .db()
        .sessions()
        .open_session(UserId(1), h.guild, ChannelId(600), "Ghost Room", Utc::now())
        .await
        .unwrap();

    let report = h.app.reconciler().run_once().await.unwrap().unwrap();
    assert_eq!(report.sessions_closed, 1);
    assert_eq!(report.rooms_retired, 1);

    let row = h
        .app
        .db()
        .channels()
        .get_channel(ChannelId(600))
        .await
        .unwrap()
        .unwrap();
    assert!(!row.active);
}

#[tokio::test]
async fn spawn_channel_presence_is_never_tracked() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");

    // Someone idling in the doorway across a restart.
    h.platform.occupy(1, SPAWN);

    let report = h.app.reconciler().run_once().await.unwrap().unwrap();
    assert_eq!(report.sessions_opened, 0);
    assert!(
        h.app
            .db()
            .sessions()
            .open_session_for_user(UserId(1), h.guild)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn afk_rooms_are_skipped_entirely() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");
    h.platform.add_channel(700, "AFK Lounge", 8);
    h.platform.occupy(1, 700);

    let report = h.app.reconciler().run_once().await.unwrap().unwrap();
    assert_eq!(report.sessions_opened, 0);
}

#[tokio::test]
async fn absent_owner_is_replaced_by_a_current_member() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");
    h.user(2, "U2");

    // A user room whose recorded owner (9) left while we were down.
    h.platform.add_channel(800, "Derelict", 2);
    h.platform.occupy(1, 800);
    h.platform.occupy(2, 800);
    h.app
        .db()
        .channels()
        .upsert_channel(&RoomRecord {
            id: ChannelId(800),
            guild_id: GuildId(GUILD),
            name: "Derelict".to_string(),
            position: 2,
            is_user_room: true,
            spawn_id: Some(ChannelId(SPAWN)),
            owner_id: None,
            owner_since: None,
            previous_owner_id: None,
            active: true,
            member_count: 2,
        })
        .await
        .unwrap();
    h.app
        .db()
        .channels()
        .set_owner(ChannelId(800), UserId(9), Utc::now(), None)
        .await
        .unwrap();

    let report = h.app.reconciler().run_once().await.unwrap().unwrap();
    assert_eq!(report.ownership_repairs, 1);

    let row = h
        .app
        .db()
        .channels()
        .get_channel(ChannelId(800))
        .await
        .unwrap()
        .unwrap();
    let owner = row.owner_id.expect("a member was elected");
    assert!(owner == UserId(1) || owner == UserId(2));
}

#[tokio::test]
async fn empty_room_with_stale_owner_record_loses_it() {
    let h = TestHarness::spawn().await;

    h.platform.add_channel(810, "Hollow", 2);
    h.app
        .db()
        .channels()
        .upsert_channel(&RoomRecord {
            id: ChannelId(810),
            guild_id: GuildId(GUILD),
            name: "Hollow".to_string(),
            position: 2,
            is_user_room: true,
            spawn_id: Some(ChannelId(SPAWN)),
            owner_id: None,
            owner_since: None,
            previous_owner_id: None,
            active: true,
            member_count: 0,
        })
        .await
        .unwrap();
    h.app
        .db()
        .channels()
        .set_owner(ChannelId(810), UserId(9), Utc::now(), None)
        .await
        .unwrap();

    let report = h.app.reconciler().run_once().await.unwrap().unwrap();
    assert_eq!(report.ownership_repairs, 1);

    let row = h
        .app
        .db()
        .channels()
        .get_channel(ChannelId(810))
        .await
        .unwrap()
        .unwrap();
    assert!(row.owner_id.is_none());
    assert_eq!(row.previous_owner_id, Some(UserId(9)));
}

#[tokio::test]
async fn a_pass_converges_the_store_to_the_platform() {
    let h = TestHarness::spawn().await;
    for id in 1..=6 {
        h.user(id, &format!("U{id}"));
    }
    h.platform.add_channel(900, "Alpha", 1);
    h.platform.add_channel(901, "Beta", 2);

    // A messy history with some transitions never delivered.
    h.join(1, 900);
    h.join(2, 900);
    h.join(3, 901);
    h.settle().await;
    h.platform.occupy(4, 901); // JOIN dropped
    h.platform.vacate(2); // LEAVE dropped
    h.platform.occupy(3, 900); // MOVE dropped
    h.join(5, 901);
    h.leave(5, 901);
    h.settle().await;

    h.app.reconciler().run_once().await.unwrap().unwrap();

    // P4: every present user has exactly one open session, in the right
    // room. P5: everyone else has none.
    for (user, expected) in [
        (1, Some(ChannelId(900))),
        (2, None),
        (3, Some(ChannelId(900))),
        (4, Some(ChannelId(901))),
        (5, None),
        (6, None),
    ] {
        let open = h
            .app
            .db()
            .sessions()
            .open_session_for_user(UserId(user), h.guild)
            .await
            .unwrap();
        assert_eq!(
            open.as_ref().map(|s| s.channel_id),
            expected,
            "user {user} open-session state"
        );
    }

    // Session counts match the live rooms.
    assert_eq!(
        h.app
            .db()
            .sessions()
            .active_members_count(ChannelId(900))
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        h.app
            .db()
            .sessions()
            .active_members_count(ChannelId(901))
            .await
            .unwrap(),
        1
    );
}
