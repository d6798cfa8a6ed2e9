use chrono::{Duration, TimeZone, Utc};
use raspberryio::db::Database;
use raspberryio::error::ValidationError;
use raspberryio::models::*;
use speculate2::speculate;
use uuid::Uuid;

fn create_feed_type(db: &Database, slug: &str, can_self_add: bool) -> FeedType {
    db.create_feed_type(CreateFeedTypeInput {
        name: slug.to_uppercase(),
        slug: slug.to_string(),
        can_self_add,
    })
    .expect("Failed to create feed type")
}

fn create_feed(
    db: &Database,
    feed_type: &FeedType,
    title: &str,
    status: ApprovalStatus,
    is_defunct: bool,
) -> Feed {
    db.create_feed(CreateFeedInput {
        title: title.to_string(),
        feed_url: format!("http://{}.example/rss/", title.to_lowercase()),
        public_url: format!("http://{}.example/", title.to_lowercase()),
        feed_type_id: feed_type.id,
        is_defunct,
        approval_status: Some(status),
        owner_id: None,
    })
    .expect("Failed to create feed")
}

fn add_item(db: &Database, feed: &Feed, guid: &str, day: u32) -> FeedItem {
    db.upsert_feed_item(
        feed.id,
        &ParsedItem {
            guid: guid.to_string(),
            title: format!("Post {}", guid),
            link: format!("{}{}", feed.public_url, guid),
            summary: None,
            date_modified: Utc.with_ymd_and_hms(2013, 5, day, 12, 0, 0).unwrap(),
        },
    )
    .expect("Failed to store item")
}

fn create_user(db: &Database, username: &str) -> User {
    db.create_user(CreateUserInput {
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password: "pi-password".to_string(),
    })
    .expect("Failed to create user")
}

fn create_project(db: &Database, owner: &User, slug: &str, published: bool) -> Project {
    db.create_project(
        owner.id,
        CreateProjectInput {
            title: slug.replace('-', " "),
            slug: slug.to_string(),
            tease: "Built with a Pi".to_string(),
            published,
        },
    )
    .expect("Failed to create project")
}

fn validation_error(err: anyhow::Error) -> ValidationError {
    err.downcast::<ValidationError>()
        .expect("Expected a validation error")
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "feed_types" {
        it "creates and finds a feed type by slug" {
            let created = create_feed_type(&db, "community", true);

            let found = db.get_feed_type_by_slug("community").expect("Query failed");
            assert_eq!(found.map(|t| t.id), Some(created.id));
            assert!(db.get_feed_type_by_slug("missing").expect("Query failed").is_none());
        }

        it "rejects a duplicate slug" {
            create_feed_type(&db, "community", false);
            let err = db.create_feed_type(CreateFeedTypeInput {
                name: "Again".to_string(),
                slug: "community".to_string(),
                can_self_add: false,
            }).unwrap_err();

            assert_eq!(validation_error(err), ValidationError::DuplicateSlug("community".to_string()));
        }

        it "deleting a feed type removes its feeds" {
            let feed_type = create_feed_type(&db, "community", false);
            let feed = create_feed(&db, &feed_type, "Foo", ApprovalStatus::Approved, false);

            assert!(db.delete_feed_type(feed_type.id).expect("Delete failed"));
            assert!(db.get_feed(feed.id).expect("Query failed").is_none());
        }
    }

    describe "feeds" {
        before {
            let feed_type = create_feed_type(&db, "community", true);
        }

        it "defaults to pending approval" {
            let feed = db.create_feed(CreateFeedInput {
                title: "Foo".to_string(),
                feed_url: "http://foo.example/rss/".to_string(),
                public_url: "http://foo.example/".to_string(),
                feed_type_id: feed_type.id,
                is_defunct: false,
                approval_status: None,
                owner_id: None,
            }).expect("Failed to create feed");

            assert_eq!(feed.approval_status, ApprovalStatus::Pending);
            assert!(!feed.is_public());
        }

        it "displays as its title" {
            let feed = create_feed(&db, &feed_type, "Foo", ApprovalStatus::Approved, false);
            assert_eq!(feed.to_string(), "Foo");
        }

        it "rejects a duplicate feed url" {
            create_feed(&db, &feed_type, "Foo", ApprovalStatus::Approved, false);
            let err = db.create_feed(CreateFeedInput {
                title: "Other".to_string(),
                feed_url: "http://foo.example/rss/".to_string(),
                public_url: "http://other.example/".to_string(),
                feed_type_id: feed_type.id,
                is_defunct: false,
                approval_status: None,
                owner_id: None,
            }).unwrap_err();

            assert!(matches!(validation_error(err), ValidationError::DuplicateFeedUrl(_)));
        }

        it "rejects an unknown feed type" {
            let err = db.create_feed(CreateFeedInput {
                title: "Foo".to_string(),
                feed_url: "http://foo.example/rss/".to_string(),
                public_url: "http://foo.example/".to_string(),
                feed_type_id: Uuid::new_v4(),
                is_defunct: false,
                approval_status: None,
                owner_id: None,
            }).unwrap_err();

            assert!(matches!(validation_error(err), ValidationError::FeedTypeNotFound(_)));
        }

        it "lists feeds by approval status" {
            create_feed(&db, &feed_type, "Foo", ApprovalStatus::Approved, false);
            create_feed(&db, &feed_type, "Bar", ApprovalStatus::Denied, false);
            create_feed(&db, &feed_type, "Baz", ApprovalStatus::Pending, false);

            let pending = db.get_pending_feeds().expect("Query failed");
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].title, "Baz");

            let denied = db.get_feeds_by_status(ApprovalStatus::Denied).expect("Query failed");
            assert_eq!(denied[0].title, "Bar");
            assert_eq!(db.get_all_feeds().expect("Query failed").len(), 3);
        }

        it "only polls approved feeds that are not defunct" {
            create_feed(&db, &feed_type, "Foo", ApprovalStatus::Approved, false);
            create_feed(&db, &feed_type, "Bar", ApprovalStatus::Approved, true);
            create_feed(&db, &feed_type, "Baz", ApprovalStatus::Pending, false);

            let feeds = db.get_active_approved_feeds().expect("Query failed");
            assert_eq!(feeds.iter().map(|f| f.title.as_str()).collect::<Vec<_>>(), vec!["Foo"]);
        }

        it "updates only the given fields" {
            let feed = create_feed(&db, &feed_type, "Foo", ApprovalStatus::Pending, false);

            let updated = db.update_feed(feed.id, UpdateFeedInput {
                is_defunct: Some(true),
                ..Default::default()
            }).expect("Update failed").expect("Feed missing");

            assert!(updated.is_defunct);
            assert_eq!(updated.title, "Foo");
            assert_eq!(updated.approval_status, ApprovalStatus::Pending);
        }

        it "approves a feed" {
            let feed = create_feed(&db, &feed_type, "Foo", ApprovalStatus::Pending, false);

            let approved = db.set_approval_status(feed.id, ApprovalStatus::Approved)
                .expect("Update failed")
                .expect("Feed missing");
            assert!(approved.is_public());
            assert!(db.set_approval_status(Uuid::new_v4(), ApprovalStatus::Approved)
                .expect("Update failed")
                .is_none());
        }

        describe "self_add_feed" {
            before {
                let owner = create_user(&db, "owner");
            }

            it "creates a pending feed owned by the user" {
                let feed = db.self_add_feed("community", owner.id, SelfAddFeedInput {
                    title: "My Pi blog".to_string(),
                    feed_url: "http://mine.example/rss/".to_string(),
                    public_url: "http://mine.example/".to_string(),
                }).expect("Self add failed");

                assert_eq!(feed.approval_status, ApprovalStatus::Pending);
                assert_eq!(feed.owner_id, Some(owner.id));
                assert_eq!(feed.feed_type_id, feed_type.id);
            }

            it "is refused for closed feed types" {
                create_feed_type(&db, "projects", false);
                let err = db.self_add_feed("projects", owner.id, SelfAddFeedInput {
                    title: "My Pi blog".to_string(),
                    feed_url: "http://mine.example/rss/".to_string(),
                    public_url: "http://mine.example/".to_string(),
                }).unwrap_err();

                assert_eq!(validation_error(err), ValidationError::SelfAddNotAllowed("projects".to_string()));
            }
        }
    }

    describe "feed_items" {
        before {
            let feed_type = create_feed_type(&db, "community", false);
            let approved = create_feed(&db, &feed_type, "Foo", ApprovalStatus::Approved, false);
            let denied = create_feed(&db, &feed_type, "Bar", ApprovalStatus::Denied, false);
            let defunct = create_feed(&db, &feed_type, "Qux", ApprovalStatus::Approved, true);
            let pending = create_feed(&db, &feed_type, "Baz", ApprovalStatus::Pending, false);
            add_item(&db, &approved, "a", 1);
            add_item(&db, &denied, "d", 2);
            add_item(&db, &defunct, "x", 3);
            add_item(&db, &pending, "p", 4);
        }

        it "counts every item of the feed type regardless of status" {
            let items = db.get_feed_type_items(feed_type.id).expect("Query failed");
            assert_eq!(items.len(), 4);
        }

        it "lists only items of approved, live feeds" {
            let items = db.get_approved_items_by_type(feed_type.id, None).expect("Query failed");
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].item.guid, "a");
            assert_eq!(items[0].feed_title, "Foo");
            assert_eq!(items[0].feed_approval_status, ApprovalStatus::Approved);
        }

        it "updates a redelivered entry in place" {
            let first = add_item(&db, &approved, "a2", 5);
            let again = db.upsert_feed_item(approved.id, &ParsedItem {
                guid: "a2".to_string(),
                title: "Edited".to_string(),
                link: "http://foo.example/a2".to_string(),
                summary: Some("now with a summary".to_string()),
                date_modified: Utc.with_ymd_and_hms(2013, 5, 6, 0, 0, 0).unwrap(),
            }).expect("Upsert failed");

            assert_eq!(again.id, first.id);
            let items = db.get_feed_items(approved.id).expect("Query failed");
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].title, "Edited");
        }

        it "limits the firehose newest first" {
            add_item(&db, &approved, "b", 10);
            add_item(&db, &approved, "c", 11);

            let items = db.get_approved_items(Some(2)).expect("Query failed");
            assert_eq!(items.iter().map(|i| i.item.guid.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);
        }
    }

    describe "users" {
        before {
            let alice = create_user(&db, "alice");
        }

        it "authenticates with the right password only" {
            let user = db.authenticate("alice", "pi-password").expect("Query failed");
            assert_eq!(user.map(|u| u.id), Some(alice.id));
            assert!(db.authenticate("alice", "wrong").expect("Query failed").is_none());
            assert!(db.authenticate("nobody", "pi-password").expect("Query failed").is_none());
        }

        it "rejects a taken username" {
            let err = db.create_user(CreateUserInput {
                username: "alice".to_string(),
                email: String::new(),
                password: "x".to_string(),
            }).unwrap_err();
            assert_eq!(validation_error(err), ValidationError::UsernameTaken("alice".to_string()));
        }

        it "rejects a malformed email but allows none" {
            let err = db.create_user(CreateUserInput {
                username: "bob".to_string(),
                email: "bob".to_string(),
                password: "x".to_string(),
            }).unwrap_err();
            assert_eq!(validation_error(err), ValidationError::InvalidEmail("bob".to_string()));
            assert!(db.get_user_by_username("bob").expect("Query failed").is_none());

            let carol = db.create_user(CreateUserInput {
                username: "carol".to_string(),
                email: String::new(),
                password: "x".to_string(),
            }).expect("Create failed");
            assert!(carol.email.is_empty());
        }

        it "lists only active users" {
            let bob = create_user(&db, "bob");
            db.set_user_active(bob.id, false).expect("Update failed");

            let users = db.get_active_users().expect("Query failed");
            assert_eq!(users.iter().map(|u| u.username.as_str()).collect::<Vec<_>>(), vec!["alice"]);
            assert!(db.authenticate("bob", "pi-password").expect("Query failed").is_none());
        }

        it "collects emails of a group's active members" {
            let bob = create_user(&db, "bob");
            let carol = create_user(&db, "carol");
            db.add_user_to_group("feed-approver", alice.id).expect("Add failed");
            db.add_user_to_group("feed-approver", bob.id).expect("Add failed");
            db.add_user_to_group("feed-approver", carol.id).expect("Add failed");
            db.set_user_active(carol.id, false).expect("Update failed");

            let emails = db.get_group_member_emails("feed-approver").expect("Query failed");
            assert_eq!(emails, vec!["alice@example.com", "bob@example.com"]);
            assert!(db.get_group_member_emails("nobody").expect("Query failed").is_empty());

            assert!(db.is_group_member("feed-approver", bob.id).expect("Query failed"));
            assert!(!db.is_group_member("nobody", bob.id).expect("Query failed"));
        }
    }

    describe "follows" {
        before {
            let alice = create_user(&db, "alice");
            let bob = create_user(&db, "bob");
            let carol = create_user(&db, "carol");
        }

        it "counts followers and following" {
            assert!(db.follow(alice.id, bob.id).expect("Follow failed"));
            assert!(db.follow(carol.id, bob.id).expect("Follow failed"));
            assert!(db.follow(bob.id, alice.id).expect("Follow failed"));

            assert_eq!(db.count_followers(bob.id).expect("Count failed"), 2);
            assert_eq!(db.count_following(bob.id).expect("Count failed"), 1);

            let profile = db.get_profile("bob").expect("Query failed").expect("Profile missing");
            assert_eq!(profile.followers_count, 2);
            assert_eq!(profile.following_count, 1);

            let followers = db.get_related_users(bob.id, Relationship::Followers).expect("Query failed");
            assert_eq!(followers.len(), 2);
            let following = db.get_related_users(bob.id, Relationship::Following).expect("Query failed");
            assert_eq!(following[0].username, "alice");
        }

        it "records one action per new follow" {
            assert!(db.follow(alice.id, bob.id).expect("Follow failed"));
            assert!(!db.follow(alice.id, bob.id).expect("Follow failed"));

            let actions = db.get_actor_actions(alice.id).expect("Query failed");
            assert_eq!(actions.len(), 1);
            assert_eq!(actions[0].verb, VERB_STARTED_FOLLOWING);
            assert_eq!(actions[0].target_username.as_deref(), Some("bob"));

            let follow = db.get_follow(alice.id, bob.id).expect("Query failed").expect("Follow missing");
            assert_eq!((follow.user_id, follow.target_id), (alice.id, bob.id));
            assert_eq!(follow.started_at, actions[0].timestamp);
            assert!(db.get_follow(bob.id, alice.id).expect("Query failed").is_none());
        }

        it "refuses to follow oneself" {
            let err = db.follow(alice.id, alice.id).unwrap_err();
            assert_eq!(validation_error(err), ValidationError::CannotFollowSelf);
        }

        it "unfollows" {
            db.follow(alice.id, bob.id).expect("Follow failed");
            assert!(db.unfollow(alice.id, bob.id).expect("Unfollow failed"));
            assert!(db.get_follow(alice.id, bob.id).expect("Query failed").is_none());
            assert!(!db.unfollow(alice.id, bob.id).expect("Unfollow failed"));
        }

        it "shows the actions of followed users on the dashboard" {
            db.follow(alice.id, bob.id).expect("Follow failed");
            db.follow(alice.id, carol.id).expect("Follow failed");
            db.follow(bob.id, carol.id).expect("Follow failed");
            db.follow(carol.id, bob.id).expect("Follow failed");

            let actions = db.get_dashboard_actions(alice.id).expect("Query failed");
            assert_eq!(actions.len(), 2);
            assert!(actions.iter().all(|a| a.actor_id != alice.id));

            assert!(db.get_dashboard_actions(Uuid::new_v4()).expect("Query failed").is_empty());
        }
    }

    describe "login_sessions" {
        before {
            let alice = create_user(&db, "alice");
        }

        it "resolves a live session to its user" {
            let token = db.create_login_session(alice.id, Duration::days(1)).expect("Create failed");
            let user = db.get_session_user(&token).expect("Query failed");
            assert_eq!(user.map(|u| u.username), Some("alice".to_string()));
        }

        it "ignores expired sessions" {
            let token = db.create_login_session(alice.id, Duration::seconds(-1)).expect("Create failed");
            assert!(db.get_session_user(&token).expect("Query failed").is_none());
        }

        it "ends sessions on logout and deactivation" {
            let first = db.create_login_session(alice.id, Duration::days(1)).expect("Create failed");
            let second = db.create_login_session(alice.id, Duration::days(1)).expect("Create failed");

            assert!(db.delete_login_session(&first).expect("Delete failed"));
            assert!(db.get_session_user(&first).expect("Query failed").is_none());

            db.set_user_active(alice.id, false).expect("Update failed");
            assert!(db.get_session_user(&second).expect("Query failed").is_none());
        }
    }

    describe "projects" {
        before {
            let alice = create_user(&db, "alice");
        }

        it "lists only published projects, newest first" {
            let bob = create_user(&db, "bob");
            create_project(&db, &alice, "weather-station", true);
            create_project(&db, &alice, "robot-arm", false);
            create_project(&db, &bob, "media-centre", true);

            let published = db.get_published_projects().expect("Query failed");
            let slugs: Vec<&str> = published.iter().map(|p| p.slug.as_str()).collect();
            assert_eq!(slugs, vec!["media-centre", "weather-station"]);
            assert_eq!(published[1].owner_username, "alice");

            db.set_user_active(bob.id, false).expect("Update failed");
            assert_eq!(db.get_published_projects().expect("Query failed").len(), 1);
        }

        it "includes drafts in a member's list only on request" {
            create_project(&db, &alice, "weather-station", true);
            create_project(&db, &alice, "robot-arm", false);

            assert_eq!(db.get_user_projects(alice.id, false).expect("Query failed").len(), 1);
            assert_eq!(db.get_user_projects(alice.id, true).expect("Query failed").len(), 2);
        }

        it "rejects duplicate and malformed slugs" {
            create_project(&db, &alice, "weather-station", true);

            let err = db.create_project(alice.id, CreateProjectInput {
                title: "Again".to_string(),
                slug: "weather-station".to_string(),
                tease: String::new(),
                published: false,
            }).unwrap_err();
            assert_eq!(validation_error(err), ValidationError::DuplicateProjectSlug("weather-station".to_string()));

            let err = db.create_project(alice.id, CreateProjectInput {
                title: "Bad".to_string(),
                slug: "Weather Station".to_string(),
                tease: String::new(),
                published: false,
            }).unwrap_err();
            assert_eq!(validation_error(err), ValidationError::InvalidSlug("Weather Station".to_string()));
        }

        it "updates only the given fields" {
            create_project(&db, &alice, "robot-arm", false);

            let updated = db.update_project("robot-arm", UpdateProjectInput {
                published: Some(true),
                ..UpdateProjectInput::default()
            }).expect("Update failed").expect("Project missing");
            assert!(updated.published);
            assert_eq!(updated.title, "robot arm");

            let stored = db.get_project_by_slug("robot-arm").expect("Query failed").expect("Project missing");
            assert!(stored.published);
            assert!(stored.updated_at >= stored.created_at);
            assert!(db.update_project("nope", UpdateProjectInput::default()).expect("Update failed").is_none());
        }

        it "deletes" {
            let project = create_project(&db, &alice, "robot-arm", true);
            assert!(db.delete_project(project.id).expect("Delete failed"));
            assert!(!db.delete_project(project.id).expect("Delete failed"));
            assert!(db.get_project_by_slug("robot-arm").expect("Query failed").is_none());
        }
    }

    describe "subscriptions" {
        it "keeps the id but rotates the verify token on resubscribe" {
            let first = db.get_or_create_subscription("http://hub.example/", "http://foo.example/rss/", None)
                .expect("Create failed");
            let second = db.get_or_create_subscription("http://hub.example/", "http://foo.example/rss/", Some("s3cret"))
                .expect("Create failed");

            assert_eq!(first.id, second.id);
            assert_ne!(first.verify_token, second.verify_token);
            assert_eq!(second.secret.as_deref(), Some("s3cret"));
            assert!(!second.verified);
        }

        it "records the lease when verified" {
            let sub = db.get_or_create_subscription("http://hub.example/", "http://foo.example/rss/", None)
                .expect("Create failed");

            let verified = db.mark_subscription_verified(sub.id, Some(3600))
                .expect("Update failed")
                .expect("Subscription missing");
            assert!(verified.verified);
            let expires = verified.lease_expiration.expect("Lease missing");
            assert!(expires > Utc::now() + Duration::minutes(59));
            assert!(!verified.lease_expired(Utc::now()));
        }

        it "finds subscriptions by topic and deletes them" {
            let sub = db.get_or_create_subscription("http://hub.example/", "http://foo.example/rss/", None)
                .expect("Create failed");
            db.get_or_create_subscription("http://other-hub.example/", "http://foo.example/rss/", None)
                .expect("Create failed");

            assert_eq!(db.get_subscriptions_by_topic("http://foo.example/rss/").expect("Query failed").len(), 2);
            assert!(db.delete_subscription(sub.id).expect("Delete failed"));
            assert!(db.get_subscription(sub.id).expect("Query failed").is_none());
        }
    }
}

#[test]
fn file_database_keeps_data_across_opens() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("nested").join("raspberryio.db");

    {
        let db = Database::open(path.clone()).expect("Failed to open database");
        db.migrate().expect("Failed to run migrations");
        create_user(&db, "alice");
    }

    let db = Database::open(path).expect("Failed to reopen database");
    db.migrate().expect("Migrations should be idempotent");
    assert!(db.get_user_by_username("alice").expect("Query failed").is_some());
}
