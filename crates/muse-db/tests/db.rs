use muse_db::Database;
use muse_db::donations::SettleOutcome;
use muse_db::invitations::IssueOutcome;
use muse_db::models::{NewDonation, NewInvitation, NewMessage, NewPhoto, NewUser};
use muse_db::queries::UserInsert;
use muse_types::models::DonationStatus;

const NOW: &str = "2026-03-01 12:00:00";
const LATER: &str = "2026-03-20 12:00:00";

fn user(db: &Database, id: &str, role: &str) {
    let email = format!("{id}@x.com");
    let outcome = db
        .create_user(&NewUser {
            id,
            name: id,
            username: id,
            email: &email,
            password_hash: "hash",
            role,
            invited_by: None,
        })
        .unwrap();
    assert_eq!(outcome, UserInsert::Created);
}

fn invitation<'a>(id: &'a str, code: &'a str, email: &'a str, sender: &'a str) -> NewInvitation<'a> {
    NewInvitation {
        id,
        code,
        email,
        sender_id: sender,
        expires_at: "2026-03-08 12:00:00",
    }
}

fn photo_donation<'a>(id: &'a str, email: &'a str, photo: &'a str) -> NewDonation<'a> {
    NewDonation {
        id,
        donor_email: email,
        donor_type: "visitor",
        amount: 25,
        kind: "photo_unlock",
        target_id: Some(photo),
        model_id: None,
        stripe_payment_id: None,
        stripe_session_id: None,
    }
}

fn add_photo(db: &Database, id: &str, model: &str) {
    db.insert_photo(
        &NewPhoto {
            id,
            model_id: model,
            title: "t",
            description: "",
            original_key: "locked/a.png",
            blurred_key: "blurred/a.png",
            price: 25,
        },
        NOW,
    )
    .unwrap();
}

#[test]
fn duplicate_email_and_username_are_reported() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "alice", "model");

    let taken = db
        .create_user(&NewUser {
            id: "other",
            name: "Other",
            username: "other",
            email: "alice@x.com",
            password_hash: "hash",
            role: "visitor",
            invited_by: None,
        })
        .unwrap();
    assert_eq!(taken, UserInsert::EmailTaken);

    let taken = db
        .create_user(&NewUser {
            id: "other",
            name: "Other",
            username: "alice",
            email: "other@x.com",
            password_hash: "hash",
            role: "visitor",
            invited_by: None,
        })
        .unwrap();
    assert_eq!(taken, UserInsert::UsernameTaken);
}

#[test]
fn quota_counts_pending_and_accepted_only() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "m", "model");

    for (i, email) in ["a@x.com", "b@x.com", "c@x.com"].iter().enumerate() {
        let id = format!("inv{i}");
        let code = format!("AAA-00{i}");
        let outcome = db.create_invitation(&invitation(&id, &code, email, "m"), true, NOW).unwrap();
        assert!(matches!(outcome, IssueOutcome::Issued(_)));
    }

    let fourth = db
        .create_invitation(&invitation("inv3", "AAA-003", "d@x.com", "m"), true, NOW)
        .unwrap();
    assert!(matches!(fourth, IssueOutcome::QuotaExceeded));

    // Privileged senders skip the quota.
    let admin = db
        .create_invitation(&invitation("inv4", "AAA-004", "d@x.com", "m"), false, NOW)
        .unwrap();
    assert!(matches!(admin, IssueOutcome::Issued(_)));

    // Once the first three lapse, the sender has room again.
    let after_expiry = db
        .create_invitation(&invitation("inv5", "AAA-005", "e@x.com", "m"), true, LATER)
        .unwrap();
    assert!(matches!(after_expiry, IssueOutcome::Issued(_)));
}

#[test]
fn one_live_invitation_per_email_and_unique_codes() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "m", "model");

    db.create_invitation(&invitation("i1", "ABC-123", "new@x.com", "m"), true, NOW).unwrap();

    let again = db
        .create_invitation(&invitation("i2", "ABC-124", "new@x.com", "m"), true, NOW)
        .unwrap();
    assert!(matches!(again, IssueOutcome::AlreadyInvited));

    let collision = db
        .create_invitation(&invitation("i3", "ABC-123", "other@x.com", "m"), true, NOW)
        .unwrap();
    assert!(matches!(collision, IssueOutcome::CodeTaken));

    let registered = db
        .create_invitation(&invitation("i4", "ABC-125", "m@x.com", "m"), true, NOW)
        .unwrap();
    assert!(matches!(registered, IssueOutcome::EmailRegistered));

    // An expired invitation no longer blocks a re-invite.
    let reissued = db
        .create_invitation(&invitation("i5", "ABC-126", "new@x.com", "m"), true, LATER)
        .unwrap();
    assert!(matches!(reissued, IssueOutcome::Issued(_)));
    assert_eq!(db.get_invitation("i1").unwrap().unwrap().status, "expired");
}

#[test]
fn registration_accepts_invitation_atomically() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "m", "model");
    user(&db, "taken", "visitor");
    db.create_invitation(&invitation("i1", "ABC-123", "new@x.com", "m"), true, NOW).unwrap();

    // Username clash rolls the acceptance back.
    let clash = db
        .create_user_accepting_invitation(
            &NewUser {
                id: "u1",
                name: "New",
                username: "taken",
                email: "new@x.com",
                password_hash: "hash",
                role: "model",
                invited_by: Some("m"),
            },
            "i1",
            NOW,
        )
        .unwrap();
    assert_eq!(clash, UserInsert::UsernameTaken);
    assert_eq!(db.get_invitation("i1").unwrap().unwrap().status, "pending");

    let new_user = NewUser {
        id: "u1",
        name: "New",
        username: "newbie",
        email: "new@x.com",
        password_hash: "hash",
        role: "model",
        invited_by: Some("m"),
    };
    let created = db.create_user_accepting_invitation(&new_user, "i1", NOW).unwrap();
    assert_eq!(created, UserInsert::Created);
    assert_eq!(db.get_invitation("i1").unwrap().unwrap().status, "accepted");
    assert_eq!(db.get_user_by_id("u1").unwrap().unwrap().invited_by.as_deref(), Some("m"));

    let replay = db
        .create_user_accepting_invitation(
            &NewUser {
                id: "u2",
                username: "second",
                email: "new@x.com",
                ..new_user
            },
            "i1",
            NOW,
        )
        .unwrap();
    assert_eq!(replay, UserInsert::InvitationUnavailable);
}

#[test]
fn sweep_flips_only_lapsed_pending_rows() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "m", "model");
    db.create_invitation(&invitation("i1", "ABC-123", "a@x.com", "m"), true, NOW).unwrap();

    assert_eq!(db.expire_stale_invitations(NOW).unwrap(), 0);
    assert_eq!(db.expire_stale_invitations(LATER).unwrap(), 1);
    assert_eq!(db.expire_stale_invitations(LATER).unwrap(), 0);

    let counts = db.count_invitations(LATER).unwrap();
    assert_eq!((counts.pending, counts.accepted, counts.expired), (0, 0, 1));
}

#[test]
fn settling_twice_creates_one_grant() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "m", "model");
    add_photo(&db, "p1", "m");
    db.insert_donation(&photo_donation("d1", "v@x.com", "p1"), NOW).unwrap();

    let first = db
        .settle_donation("d1", Some("pi_1"), DonationStatus::Succeeded, NOW)
        .unwrap();
    let SettleOutcome::Settled { donation, grant } = first else {
        panic!("expected a fresh settlement, got {first:?}");
    };
    assert_eq!(donation.status, "succeeded");
    assert_eq!(donation.stripe_payment_id.as_deref(), Some("pi_1"));
    assert_eq!(grant.unwrap().target_id, "p1");

    let second = db
        .settle_donation("d1", Some("pi_1"), DonationStatus::Succeeded, NOW)
        .unwrap();
    assert!(matches!(second, SettleOutcome::AlreadySucceeded { .. }));

    assert_eq!(db.donation_totals().unwrap().grants, 1);
    assert!(db.has_unlock("v@x.com", "photo", "p1", NOW).unwrap());
    assert!(db.photo_unlocked_for("v@x.com", "p1", NOW).unwrap());
    assert!(!db.photo_unlocked_for("w@x.com", "p1", NOW).unwrap());
    assert_eq!(db.get_photo("p1").unwrap().unwrap().unlock_count, 1);
}

#[test]
fn second_success_for_same_pair_is_marked_failed() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "m", "model");
    add_photo(&db, "p1", "m");
    db.insert_donation(&photo_donation("d1", "v@x.com", "p1"), NOW).unwrap();
    db.insert_donation(&photo_donation("d2", "v@x.com", "p1"), NOW).unwrap();

    db.settle_donation("d1", Some("pi_1"), DonationStatus::Succeeded, NOW).unwrap();
    let dup = db
        .settle_donation("d2", Some("pi_2"), DonationStatus::Succeeded, NOW)
        .unwrap();
    let SettleOutcome::Duplicate { donation, existing } = dup else {
        panic!("expected duplicate, got {dup:?}");
    };
    assert_eq!(donation.status, "failed");
    assert_eq!(existing.unwrap().id, "d1");

    let totals = db.donation_totals().unwrap();
    assert_eq!((totals.succeeded, totals.grants), (1, 1));
}

#[test]
fn signup_donation_grants_nothing() {
    let db = Database::open_in_memory().unwrap();
    db.insert_donation(
        &NewDonation {
            id: "d1",
            donor_email: "new@x.com",
            donor_type: "model",
            amount: 25,
            kind: "model_signup",
            target_id: None,
            model_id: None,
            stripe_payment_id: Some("pi_1"),
            stripe_session_id: None,
        },
        NOW,
    )
    .unwrap();

    let outcome = db.settle_donation("d1", None, DonationStatus::Succeeded, NOW).unwrap();
    assert!(matches!(outcome, SettleOutcome::Settled { grant: None, .. }));
    assert!(db.find_succeeded_donation("new@x.com", "model_signup", None).unwrap().is_some());
    assert_eq!(db.find_donation_by_payment_id("pi_1").unwrap().unwrap().id, "d1");
}

#[test]
fn model_grant_unlocks_every_photo_of_the_model() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "m", "model");
    add_photo(&db, "p1", "m");
    add_photo(&db, "p2", "m");
    db.insert_donation(
        &NewDonation {
            kind: "model_unlock",
            target_id: Some("m"),
            ..photo_donation("d1", "v@x.com", "unused")
        },
        NOW,
    )
    .unwrap();
    db.settle_donation("d1", Some("pi_1"), DonationStatus::Succeeded, NOW).unwrap();

    assert!(db.photo_unlocked_for("v@x.com", "p2", NOW).unwrap());
    assert_eq!(db.list_unlocked_photos("v@x.com", NOW).unwrap().len(), 2);
}

#[test]
fn deleting_a_photo_drops_its_grants() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "m", "model");
    add_photo(&db, "p1", "m");
    db.insert_donation(&photo_donation("d1", "v@x.com", "p1"), NOW).unwrap();
    db.settle_donation("d1", None, DonationStatus::Succeeded, NOW).unwrap();

    let removed = db.delete_photo("p1").unwrap().unwrap();
    assert_eq!(removed.original_key, "locked/a.png");
    assert!(db.get_photo("p1").unwrap().is_none());
    assert_eq!(db.donation_totals().unwrap().grants, 0);
    assert!(db.delete_photo("p1").unwrap().is_none());
}

#[test]
fn deleting_a_model_cascades() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "m", "model");
    add_photo(&db, "p1", "m");
    db.set_profile_photo("m", Some("profiles/m.png")).unwrap();

    let removal = db.delete_model("m").unwrap().unwrap();
    assert_eq!(removal.profile_photo.as_deref(), Some("profiles/m.png"));
    assert_eq!(removal.photos.len(), 1);
    assert!(db.get_user_by_id("m").unwrap().is_none());
    assert!(db.get_photo("p1").unwrap().is_none());
}

#[test]
fn conversation_is_shared_by_the_unordered_pair() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "a", "model");
    user(&db, "b", "visitor");

    let first = db.upsert_conversation("a", "b", NOW).unwrap();
    let second = db.upsert_conversation("b", "a", NOW).unwrap();
    assert_eq!(first.id, second.id);

    db.deactivate_conversation(&first.id).unwrap();
    assert!(db.list_conversations("a").unwrap().is_empty());
    let revived = db.upsert_conversation("a", "b", NOW).unwrap();
    assert_eq!(revived.id, first.id);
    assert!(revived.is_active);
}

#[test]
fn messages_move_pointer_and_mark_read_is_idempotent() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "a", "model");
    user(&db, "b", "visitor");

    for id in ["m1", "m2"] {
        db.send_message(
            &NewMessage {
                id,
                sender_id: "a",
                recipient_id: "b",
                content: "hi",
                attachments: "[]",
            },
            NOW,
        )
        .unwrap();
    }

    let conversations = db.list_conversations("b").unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].last_message_id.as_deref(), Some("m2"));
    assert_eq!(db.list_messages(&conversations[0].id).unwrap().len(), 2);

    assert_eq!(db.unread_count("b").unwrap(), 2);
    assert_eq!(db.mark_read("b", "a").unwrap(), 2);
    assert_eq!(db.mark_read("b", "a").unwrap(), 0);
    assert_eq!(db.unread_count("b").unwrap(), 0);
}
