use raspberryio::aggregator::FeedSyncer;
use raspberryio::config::PushSettings;
use raspberryio::db::Database;
use raspberryio::models::*;
use raspberryio::push::{self, Delivery, HubClient, HubError};
use reqwest::StatusCode;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOPIC: &str = "http://foo.example/rss/";

const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Foo</title>
    <link>http://foo.example/</link>
    <item>
      <title>Blinking LEDs</title>
      <link>http://foo.example/leds</link>
      <guid>foo-leds</guid>
      <pubDate>Mon, 06 May 2013 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>GPIO basics</title>
      <link>http://foo.example/gpio</link>
      <guid>foo-gpio</guid>
      <pubDate>Tue, 07 May 2013 10:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

fn setup_db() -> Database {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    db
}

fn create_feed(db: &Database, feed_url: &str, status: ApprovalStatus) -> Feed {
    let feed_type = match db.get_feed_type_by_slug("community").expect("Query failed") {
        Some(feed_type) => feed_type,
        None => db
            .create_feed_type(CreateFeedTypeInput {
                name: "Community".to_string(),
                slug: "community".to_string(),
                can_self_add: false,
            })
            .expect("Failed to create feed type"),
    };

    db.create_feed(CreateFeedInput {
        title: "Foo".to_string(),
        feed_url: feed_url.to_string(),
        public_url: "http://foo.example/".to_string(),
        feed_type_id: feed_type.id,
        is_defunct: false,
        approval_status: Some(status),
        owner_id: None,
    })
    .expect("Failed to create feed")
}

fn hub_client(hub: &str, secret: Option<&str>) -> HubClient {
    HubClient::new(
        PushSettings {
            hub: hub.to_string(),
            superfeedr_creds: Some((
                "superfeedr-id".to_string(),
                "superfeedr-secret".to_string(),
            )),
            secret: secret.map(str::to_string),
            lease_seconds: 86400,
        },
        "https://raspberry.io",
    )
}

mod hub_client {
    use super::*;

    #[tokio::test]
    async fn subscribes_with_credentials_and_both_verify_modes() {
        let hub = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hubbub"))
            .and(header(
                "authorization",
                "Basic c3VwZXJmZWVkci1pZDpzdXBlcmZlZWRyLXNlY3JldA==",
            ))
            .and(body_string_contains("hub.mode=subscribe"))
            .and(body_string_contains("hub.verify=sync&hub.verify=async"))
            .and(body_string_contains("hub.lease_seconds=86400"))
            .and(body_string_contains("hub.secret=s3cret"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&hub)
            .await;

        let db = setup_db();
        let client = hub_client(&format!("{}/hubbub", hub.uri()), Some("s3cret"));

        let subscription = client
            .subscribe(&db, TOPIC, None)
            .await
            .expect("Subscribe failed");

        assert_eq!(subscription.topic, TOPIC);
        assert!(!subscription.verified);
        assert_eq!(
            client.callback_url(&subscription),
            format!("https://raspberry.io/subscriber/{}/", subscription.id)
        );
    }

    #[tokio::test]
    async fn reports_a_rejecting_hub() {
        let hub = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad topic"))
            .mount(&hub)
            .await;

        let db = setup_db();
        let client = hub_client(&hub.uri(), None);

        let err = client.subscribe(&db, TOPIC, None).await.unwrap_err();

        match err {
            HubError::Rejected(status, body) => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                assert_eq!(body, "bad topic");
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unsubscribes_through_the_same_hub() {
        let hub = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("hub.mode=subscribe"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&hub)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("hub.mode=unsubscribe"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&hub)
            .await;

        let db = setup_db();
        let client = hub_client("https://unused.example/", None);

        let subscription = client
            .subscribe(&db, TOPIC, Some(&hub.uri()))
            .await
            .expect("Subscribe failed");
        assert_eq!(subscription.hub, hub.uri());

        client
            .unsubscribe(&subscription)
            .await
            .expect("Unsubscribe failed");
    }
}

mod callbacks {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn stores_signed_content() {
        let db = setup_db();
        let feed = create_feed(&db, TOPIC, ApprovalStatus::Approved);
        let sub = db
            .get_or_create_subscription("http://hub.example/", TOPIC, Some("s3cret"))
            .expect("Create failed");

        let signature = sign("s3cret", RSS.as_bytes());
        let delivery = push::receive_content(&db, sub.id, Some(&signature), RSS.as_bytes())
            .expect("Receive failed");

        assert_eq!(delivery, Some(Delivery::Stored(2)));
        assert_eq!(db.get_feed_items(feed.id).expect("Query failed").len(), 2);
    }

    #[test]
    fn drops_content_with_a_bad_signature() {
        let db = setup_db();
        let feed = create_feed(&db, TOPIC, ApprovalStatus::Approved);
        let sub = db
            .get_or_create_subscription("http://hub.example/", TOPIC, Some("s3cret"))
            .expect("Create failed");

        let signature = sign("wrong", RSS.as_bytes());
        let delivery = push::receive_content(&db, sub.id, Some(&signature), RSS.as_bytes())
            .expect("Receive failed");

        assert_eq!(delivery, Some(Delivery::BadSignature));
        assert!(db.get_feed_items(feed.id).expect("Query failed").is_empty());
    }

    #[test]
    fn reports_unknown_feeds_and_malformed_bodies() {
        let db = setup_db();
        let sub = db
            .get_or_create_subscription("http://hub.example/", TOPIC, None)
            .expect("Create failed");

        let delivery = push::receive_content(&db, sub.id, None, RSS.as_bytes()).expect("Receive failed");
        assert_eq!(delivery, Some(Delivery::UnknownFeed));

        create_feed(&db, TOPIC, ApprovalStatus::Approved);
        let delivery = push::receive_content(&db, sub.id, None, b"not a feed").expect("Receive failed");
        assert_eq!(delivery, Some(Delivery::Malformed));

        let delivery = push::receive_content(&db, uuid::Uuid::new_v4(), None, RSS.as_bytes())
            .expect("Receive failed");
        assert_eq!(delivery, None);
    }

    #[test]
    fn unsubscribe_verification_removes_the_subscription() {
        let db = setup_db();
        let sub = db
            .get_or_create_subscription("http://hub.example/", TOPIC, None)
            .expect("Create failed");

        let params = push::VerifyParams {
            mode: Some("unsubscribe".to_string()),
            topic: Some(TOPIC.to_string()),
            challenge: Some("bye".to_string()),
            verify_token: Some(sub.verify_token.clone()),
            lease_seconds: None,
        };

        let challenge = push::verify_intent(&db, sub.id, &params).expect("Verify failed");
        assert_eq!(challenge.as_deref(), Some("bye"));
        assert!(db.get_subscription(sub.id).expect("Query failed").is_none());
    }
}

mod polling {
    use super::*;

    #[tokio::test]
    async fn syncs_approved_feeds_and_skips_broken_ones() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken/rss"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let db = setup_db();
        let good = create_feed(&db, &format!("{}/good/rss", server.uri()), ApprovalStatus::Approved);
        create_feed(&db, &format!("{}/broken/rss", server.uri()), ApprovalStatus::Approved);
        create_feed(&db, &format!("{}/pending/rss", server.uri()), ApprovalStatus::Pending);

        let report = FeedSyncer::new(db.clone())
            .expect("Failed to build syncer")
            .sync_all()
            .await
            .expect("Sync failed");

        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.items, 2);
        let items = db.get_feed_items(good.id).expect("Query failed");
        assert_eq!(items[0].title, "GPIO basics");
    }
}
