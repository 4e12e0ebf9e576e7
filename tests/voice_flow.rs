//! Integration tests for the voice-room lifecycle: spawn-and-own,
//! inheritance, auto-deletion, moves, preference carry-over.

mod common;

use atriumd::platform::{
    ChannelId, OverwriteTarget, PermissionOverwrite, PermissionSet, RoleId, UserId,
};
use chrono::{TimeDelta, Utc};
use common::{EXCLUDED, SPAWN, TestHarness, wait_for};

#[tokio::test]
async fn spawn_entry_creates_an_owned_room() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");

    let room_id = h.create_room(1, "U1").await;
    let room = h.platform.channel_info(room_id).unwrap();

    // The user was moved into their room.
    assert_eq!(h.platform.occupant_channel(1), Some(room_id));

    // One slot above the spawn channel.
    assert_eq!(room.position, 4);

    // Never a session for the spawn channel itself.
    assert_eq!(
        h.app
            .db()
            .sessions()
            .active_members_count(ChannelId(SPAWN))
            .await
            .unwrap(),
        0
    );

    // The owner overwrite grants channel-scoped rights only.
    let overwrite = room
        .overwrites
        .iter()
        .find(|ow| ow.target == OverwriteTarget::User(UserId(1)))
        .expect("owner overwrite seeded");
    assert_eq!(overwrite.allow, PermissionSet::owner_grant());

    // A welcome card landed in the new room.
    wait_for!(h, "welcome card", {
        h.platform
            .sent_embeds()
            .iter()
            .any(|(channel, embed)| *channel == room_id && embed.title.contains("U1's Channel"))
    });
}

#[tokio::test]
async fn owner_leaving_hands_the_room_to_the_longest_standing_member() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");
    h.user(2, "U2");
    h.user(3, "U3");

    let room = h.create_room(1, "U1").await;

    // A role overwrite that must survive the transfer.
    let role_gate = PermissionOverwrite {
        target: OverwriteTarget::Role(RoleId(777)),
        allow: PermissionSet::empty(),
        deny: PermissionSet::STREAM,
    };
    h.platform.seed_overwrite(room, role_gate.clone());

    let t0 = Utc::now();
    h.join_at(2, room.0, t0 + TimeDelta::seconds(1));
    h.join_at(3, room.0, t0 + TimeDelta::seconds(2));
    wait_for!(h, "both members tracked", {
        h.app
            .db()
            .sessions()
            .active_members_count(room)
            .await
            .unwrap()
            == 3
    });

    h.leave_at(1, room.0, t0 + TimeDelta::seconds(30));

    wait_for!(h, "ownership moved to U2", {
        h.app
            .db()
            .channels()
            .get_channel(room)
            .await
            .unwrap()
            .is_some_and(|r| r.owner_id == Some(UserId(2)))
    });

    // The departed owner's session closed with a sane duration.
    let open = h
        .app
        .db()
        .sessions()
        .open_session_for_user(UserId(1), h.guild)
        .await
        .unwrap();
    assert!(open.is_none());
    let (joined_ms, left_ms, duration): (i64, Option<i64>, Option<i64>) = sqlx::query_as(
        "SELECT joined_at, left_at, duration_sec FROM voice_sessions \
         WHERE user_id = 1 AND channel_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(room.0 as i64)
    .fetch_one(h.app.db().pool())
    .await
    .unwrap();
    let left_ms = left_ms.expect("closed");
    assert!(left_ms >= joined_ms);
    assert_eq!(duration, Some((left_ms - joined_ms) / 1000));

    let info = h.platform.channel_info(room).unwrap();

    // Renamed for the inheritor, who has no stored preference.
    assert_eq!(info.name, "U2's Channel");

    // U1's user overwrite is gone, the inheritor's is in, the role
    // overwrite survived.
    assert!(
        !info
            .overwrites
            .iter()
            .any(|ow| ow.target == OverwriteTarget::User(UserId(1)))
    );
    assert!(
        info.overwrites
            .iter()
            .any(|ow| ow.target == OverwriteTarget::User(UserId(2))
                && ow.allow == PermissionSet::owner_grant())
    );
    assert!(info.overwrites.contains(&role_gate));

    // The transfer notice was posted.
    assert!(
        h.platform
            .sent_embeds()
            .iter()
            .any(|(channel, embed)| *channel == room
                && embed.title == "Ownership transferred"
                && embed.description.contains("U2"))
    );
}

#[tokio::test]
async fn last_member_leaving_deletes_the_room() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");

    let room = h.create_room(1, "U1").await;
    h.leave(1, room.0);

    wait_for!(h, "room deleted and row retired", {
        !h.platform.channel_exists(room)
            && h.app
                .db()
                .channels()
                .get_channel(room)
                .await
                .unwrap()
                .is_some_and(|r| !r.active && r.owner_id.is_none())
    });

    let open = h
        .app
        .db()
        .sessions()
        .open_session_for_user(UserId(1), h.guild)
        .await
        .unwrap();
    assert!(open.is_none());
}

#[tokio::test]
async fn moving_between_rooms_closes_one_session_and_opens_another() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");
    h.platform.add_channel(400, "Port A", 1);
    h.platform.add_channel(401, "Port B", 2);

    let t0 = Utc::now();
    h.join_at(1, 400, t0);
    wait_for!(h, "session open in A", {
        h.app
            .db()
            .sessions()
            .active_members_count(ChannelId(400))
            .await
            .unwrap()
            == 1
    });

    let t1 = t0 + TimeDelta::seconds(42);
    h.move_user_at(1, 400, 401, t1);

    wait_for!(h, "session moved to B", {
        h.app
            .db()
            .sessions()
            .open_session_for_user(UserId(1), h.guild)
            .await
            .unwrap()
            .is_some_and(|s| s.channel_id == ChannelId(401))
    });

    // Exactly one closed row in A, stamped at the move instant.
    let rows: Vec<(i64, Option<i64>)> = sqlx::query_as(
        "SELECT joined_at, left_at FROM voice_sessions WHERE user_id = 1 AND channel_id = 400",
    )
    .fetch_all(h.app.db().pool())
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1, Some(t1.timestamp_millis()));

    // The new session opened at the same instant.
    let open = h
        .app
        .db()
        .sessions()
        .open_session_for_user(UserId(1), h.guild)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(open.joined_at.timestamp_millis(), t1.timestamp_millis());

    // Leaving 90 seconds later closes with exactly that duration.
    h.leave_at(1, 401, t1 + TimeDelta::seconds(90));
    wait_for!(h, "session closed in B", {
        h.app
            .db()
            .sessions()
            .open_session_for_user(UserId(1), h.guild)
            .await
            .unwrap()
            .is_none()
    });
    let duration: Option<i64> =
        sqlx::query_scalar("SELECT duration_sec FROM voice_sessions WHERE user_id = 1 AND channel_id = 401")
            .fetch_one(h.app.db().pool())
            .await
            .unwrap();
    assert_eq!(duration, Some(90));
}

#[tokio::test]
async fn owner_preferences_carry_over_to_new_joiners() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");
    h.user(2, "U2");
    h.user(3, "U3");

    h.app
        .db()
        .prefs()
        .update_owner_prefs(UserId(1), h.guild, |p| {
            p.muted_users.push(UserId(2));
            p.banned_users.push(UserId(3));
        })
        .await
        .unwrap();

    let room = h.create_room(1, "U1").await;

    h.join(2, room.0);
    wait_for!(h, "U2 muted with call state updated", {
        use atriumd::cache::{CallState, keys};
        let state: Option<CallState> = h.app.cache().get(&keys::call_state(room)).await.unwrap();
        h.platform.is_muted(2) && state.is_some_and(|s| s.muted_users.contains(&UserId(2)))
    });

    h.join(3, room.0);
    wait_for!(h, "U3 disconnected and session closed", {
        h.platform.occupant_channel(3).is_none()
            && h.app
                .db()
                .sessions()
                .open_session_for_user(UserId(3), h.guild)
                .await
                .unwrap()
                .is_none()
    });

    // U2 is still in and still tracked.
    assert_eq!(h.platform.occupant_channel(2), Some(room));
    let open = h
        .app
        .db()
        .sessions()
        .open_session_for_user(UserId(2), h.guild)
        .await
        .unwrap();
    assert!(open.is_some_and(|s| s.channel_id == room));
}

#[tokio::test]
async fn excluded_rooms_track_presence_but_are_never_mutated() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");
    h.platform.add_channel(EXCLUDED, "Archive Hall", 9);

    h.join(1, EXCLUDED);
    wait_for!(h, "session tracked in read-only room", {
        h.app
            .db()
            .sessions()
            .active_members_count(ChannelId(EXCLUDED))
            .await
            .unwrap()
            == 1
    });

    h.leave(1, EXCLUDED);
    wait_for!(h, "session closed", {
        h.app
            .db()
            .sessions()
            .active_members_count(ChannelId(EXCLUDED))
            .await
            .unwrap()
            == 0
    });

    // The room itself was left alone.
    assert!(h.platform.channel_exists(ChannelId(EXCLUDED)));
    assert!(h.platform.sent_embeds().is_empty());
}

#[tokio::test]
async fn shutdown_closes_every_open_session() {
    let h = TestHarness::spawn().await;
    h.user(1, "U1");
    h.user(2, "U2");
    h.platform.add_channel(500, "Orbit", 3);

    h.join(1, 500);
    h.join(2, 500);
    wait_for!(h, "both sessions open", {
        h.app
            .db()
            .sessions()
            .active_members_count(ChannelId(500))
            .await
            .unwrap()
            == 2
    });

    let db = h.app.db().clone();
    h.app.shutdown().await;

    assert!(db.sessions().all_active_sessions().await.unwrap().is_empty());
}
