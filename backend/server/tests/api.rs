use std::{io::Cursor, sync::Arc};

use chrono::{Duration, Utc};
use image::{DynamicImage, ImageFormat, RgbImage};
use models::{Bounty, BountyStatus, Role};
use reqwest::{
    Client, Response, StatusCode,
    multipart::{Form, Part},
};
use serde_json::{Value, json};
use server::{
    config::Config,
    database::{Database, MemoryDatabase, UserPatch},
    routes,
    search::{MemoryIndex, sync_dirty},
    state::State,
    storage::MemoryStore,
};
use tokio::net::TcpListener;
use uuid::Uuid;

const PASSWORD: &str = "rotorwash42";

struct TestApp {
    base: String,
    client: Client,
    db: Arc<MemoryDatabase>,
    search: Arc<MemoryIndex>,
    storage: Arc<MemoryStore>,
}

struct Account {
    id: Uuid,
    access: String,
    refresh: String,
}

async fn spawn_app() -> TestApp {
    let db = Arc::new(MemoryDatabase::new());
    let search = Arc::new(MemoryIndex::new());
    let storage = Arc::new(MemoryStore::new());
    let state = State::with_parts(
        Config::in_memory("test-secret"),
        db.clone(),
        search.clone(),
        storage.clone(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, routes::router(state)).await.unwrap();
    });

    TestApp {
        base: format!("http://{address}"),
        client: Client::new(),
        db,
        search,
        storage,
    }
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn register(&self, username: &str) -> Account {
        let response = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "email": format!("{username}@dronewerx.test"),
                "username": username,
                "fullName": "Test Operator",
                "password": PASSWORD,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body: Value = response.json().await.unwrap();
        Account {
            id: body["user"]["id"].as_str().unwrap().parse().unwrap(),
            access: body["tokens"]["accessToken"].as_str().unwrap().to_string(),
            refresh: body["tokens"]["refreshToken"].as_str().unwrap().to_string(),
        }
    }

    async fn promote(&self, account: &Account, role: Role) {
        let mut patch = UserPatch::new(Utc::now());
        patch.role = Some(role);
        self.db.patch_user(account.id, &patch).await.unwrap();
    }

    async fn get(&self, path: &str, token: Option<&str>) -> Response {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn patch(&self, path: &str, token: &str, body: Value) -> Response {
        self.client
            .patch(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn delete(&self, path: &str, token: &str) -> Response {
        self.client
            .delete(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    async fn create_thread(&self, author: &Account, title: &str) -> Value {
        let response = self
            .post(
                "/api/threads",
                &author.access,
                json!({
                    "title": title,
                    "content": "Small units need an answer within the quarter.",
                    "category": "communications",
                    "tags": ["Mesh", "rf"],
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json().await.unwrap()
    }

    async fn create_solution(&self, author: &Account, thread_id: &str) -> Value {
        let response = self
            .post(
                &format!("/api/threads/{thread_id}/solutions"),
                &author.access,
                json!({
                    "title": "Frequency hopping relay",
                    "content": "Fielded relay kit, two week lead time.",
                    "trl": 6,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json().await.unwrap()
    }

    async fn refresh(&self, token: &str) -> Response {
        self.client
            .post(self.url("/api/auth/refresh"))
            .json(&json!({ "refreshToken": token }))
            .send()
            .await
            .unwrap()
    }

    async fn login(&self, username: &str) -> Response {
        self.client
            .post(self.url("/api/auth/login"))
            .json(&json!({
                "email": format!("{username}@dronewerx.test"),
                "password": PASSWORD,
            }))
            .send()
            .await
            .unwrap()
    }

    async fn reputation(&self, account: &Account) -> i64 {
        let body: Value = self
            .get(&format!("/api/users/{}", account.id), None)
            .await
            .json()
            .await
            .unwrap();
        body["reputation"].as_i64().unwrap()
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = spawn_app().await;

    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn register_login_and_me() {
    let app = spawn_app().await;
    let account = app.register("falcon").await;

    let me: Value = app
        .get("/api/auth/me", Some(&account.access))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(me["username"], "falcon");
    assert_eq!(me["email"], "falcon@dronewerx.test");
    assert!(me.get("passwordHash").is_none());

    let profile: Value = app
        .get(&format!("/api/users/{}", account.id), None)
        .await
        .json()
        .await
        .unwrap();
    assert!(profile.get("email").is_none());

    let duplicate = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&json!({
            "email": "FALCON@dronewerx.test",
            "username": "falcon2",
            "fullName": "Someone Else",
            "password": PASSWORD,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let login = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": "falcon@dronewerx.test", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);

    let anonymous = app.get("/api/auth/me", None).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    let body: Value = anonymous.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn repeated_login_failures_are_limited() {
    let app = spawn_app().await;
    app.register("kestrel").await;

    let attempt = |password: &'static str| {
        app.client
            .post(app.url("/api/auth/login"))
            .json(&json!({ "email": "kestrel@dronewerx.test", "password": password }))
            .send()
    };

    for _ in 0..5 {
        let response = attempt("wrongpass1").await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let locked = attempt(PASSWORD).await.unwrap();
    assert_eq!(locked.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn refresh_rotates_and_logout_revokes() {
    let app = spawn_app().await;
    let account = app.register("harrier").await;

    let rotated = app
        .client
        .post(app.url("/api/auth/refresh"))
        .json(&json!({ "refreshToken": account.refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(rotated.status(), StatusCode::OK);
    let pair: Value = rotated.json().await.unwrap();
    let access = pair["accessToken"].as_str().unwrap().to_string();
    let refresh = pair["refreshToken"].as_str().unwrap().to_string();

    let replay = app
        .client
        .post(app.url("/api/auth/refresh"))
        .json(&json!({ "refreshToken": account.refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    let logout = app.post("/api/auth/logout", &access, json!({})).await;
    assert_eq!(logout.status(), StatusCode::NO_CONTENT);

    let me = app.get("/api/auth/me", Some(&access)).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);

    // The session is gone, so even the unused refresh token is dead.
    let after = app
        .client
        .post(app.url("/api/auth/refresh"))
        .json(&json!({ "refreshToken": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn thread_lifecycle() {
    let app = spawn_app().await;
    let author = app.register("osprey").await;
    let stranger = app.register("condor").await;

    let short = app
        .post(
            "/api/threads",
            &author.access,
            json!({ "title": "Hi", "content": "x", "category": "sensors" }),
        )
        .await;
    assert_eq!(short.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let thread = app.create_thread(&author, "Mesh radio for squad drones").await;
    let id = thread["id"].as_str().unwrap();
    assert_eq!(thread["status"], "open");
    assert_eq!(thread["tags"], json!(["mesh", "rf"]));

    for expected in 1..=2 {
        let fetched: Value = app
            .get(&format!("/api/threads/{id}"), None)
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(fetched["views"], expected);
    }

    let listed: Value = app
        .get("/api/threads?category=communications&tag=mesh", None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["items"][0]["id"], id);

    let foreign = app
        .patch(
            &format!("/api/threads/{id}"),
            &stranger.access,
            json!({ "title": "Taken over" }),
        )
        .await;
    assert_eq!(foreign.status(), StatusCode::FORBIDDEN);

    let updated: Value = app
        .patch(
            &format!("/api/threads/{id}"),
            &author.access,
            json!({ "status": "in_progress" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(updated["status"], "in_progress");

    let removed = app.delete(&format!("/api/threads/{id}"), &author.access).await;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);

    let gone = app.get(&format!("/api/threads/{id}"), None).await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    let malformed = app.get("/api/threads/not-a-uuid", None).await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn votes_toggle_and_move_reputation() {
    let app = spawn_app().await;
    let author = app.register("raven").await;
    let voter = app.register("merlin").await;
    let thread = app.create_thread(&author, "Counter UAS cueing gaps").await;
    let path = format!("/api/threads/{}/vote", thread["id"].as_str().unwrap());

    let own = app.post(&path, &author.access, json!({ "type": "up" })).await;
    assert_eq!(own.status(), StatusCode::FORBIDDEN);

    let up: Value = app
        .post(&path, &voter.access, json!({ "type": "up" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(up["current"], "up");
    assert_eq!(up["votes"]["upvotes"], 1);
    assert_eq!(app.reputation(&author).await, 1);

    let mine: Value = app
        .get(&path, Some(&voter.access))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(mine["vote"], "up");

    let switched: Value = app
        .post(&path, &voter.access, json!({ "type": "down" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(switched["previous"], "up");
    assert_eq!(switched["votes"]["upvotes"], 0);
    assert_eq!(switched["votes"]["downvotes"], 1);
    assert_eq!(app.reputation(&author).await, -1);

    let withdrawn: Value = app
        .post(&path, &voter.access, json!({ "type": "down" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(withdrawn["current"], Value::Null);
    assert_eq!(withdrawn["votes"]["downvotes"], 0);
    assert_eq!(app.reputation(&author).await, 0);
}

#[tokio::test]
async fn accepting_a_solution_solves_the_thread() {
    let app = spawn_app().await;
    let author = app.register("griffon").await;
    let engineer = app.register("wyvern").await;
    let rival = app.register("hippogriff").await;

    let thread = app.create_thread(&author, "Long endurance in cold weather").await;
    let thread_id = thread["id"].as_str().unwrap();
    let first = app.create_solution(&engineer, thread_id).await;
    let second = app.create_solution(&rival, thread_id).await;
    let first_id = first["id"].as_str().unwrap();
    let second_id = second["id"].as_str().unwrap();

    let stolen = app
        .post(&format!("/api/solutions/{first_id}/accept"), &engineer.access, json!({}))
        .await;
    assert_eq!(stolen.status(), StatusCode::FORBIDDEN);

    let accepted: Value = app
        .post(&format!("/api/solutions/{first_id}/accept"), &author.access, json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(accepted["isAccepted"], true);
    assert_eq!(app.reputation(&engineer).await, 15);

    let thread: Value = app
        .get(&format!("/api/threads/{thread_id}"), None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(thread["status"], "solved");
    assert_eq!(thread["acceptedSolutionId"], first_id);
    assert_eq!(thread["solutionCount"], 2);

    app.post(&format!("/api/solutions/{second_id}/accept"), &author.access, json!({}))
        .await;
    assert_eq!(app.reputation(&engineer).await, 0);
    assert_eq!(app.reputation(&rival).await, 15);

    let previous: Value = app
        .get(&format!("/api/solutions/{first_id}"), None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(previous["isAccepted"], false);
}

#[tokio::test]
async fn comments_thread_and_lock() {
    let app = spawn_app().await;
    let author = app.register("peregrine").await;
    let moderator = app.register("goshawk").await;
    app.promote(&moderator, Role::Moderator).await;

    let thread = app.create_thread(&author, "Payload release mechanism").await;
    let thread_id = thread["id"].as_str().unwrap();
    let path = format!("/api/threads/{thread_id}/comments");

    let comment: Value = app
        .post(&path, &moderator.access, json!({ "content": "Which airframe?" }))
        .await
        .json()
        .await
        .unwrap();
    let reply = app
        .post(
            &path,
            &author.access,
            json!({ "content": "Quad, 5kg class", "parentId": comment["id"] }),
        )
        .await;
    assert_eq!(reply.status(), StatusCode::CREATED);

    let listed: Value = app.get(&path, None).await.json().await.unwrap();
    assert_eq!(listed["total"], 2);

    let edit = app
        .patch(
            &format!("/api/comments/{}", comment["id"].as_str().unwrap()),
            &author.access,
            json!({ "content": "hijacked" }),
        )
        .await;
    assert_eq!(edit.status(), StatusCode::FORBIDDEN);

    let plain = app
        .patch(
            &format!("/api/threads/{thread_id}/moderation"),
            &author.access,
            json!({ "isLocked": true }),
        )
        .await;
    assert_eq!(plain.status(), StatusCode::FORBIDDEN);

    let locked: Value = app
        .patch(
            &format!("/api/threads/{thread_id}/moderation"),
            &moderator.access,
            json!({ "isLocked": true }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(locked["isLocked"], true);

    let late = app
        .post(&path, &author.access, json!({ "content": "one more thing" }))
        .await;
    assert_eq!(late.status(), StatusCode::CONFLICT);

    let solution = app
        .post(
            &format!("/api/threads/{thread_id}/solutions"),
            &moderator.access,
            json!({ "title": "Servo latch", "content": "Off the shelf" }),
        )
        .await;
    assert_eq!(solution.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn bounty_award_and_expiry() {
    let app = spawn_app().await;
    let sponsor = app.register("albatross").await;
    let engineer = app.register("petrel").await;

    let thread = app.create_thread(&sponsor, "Low cost loitering sensor").await;
    let thread_id = thread["id"].as_str().unwrap();
    let solution = app.create_solution(&engineer, thread_id).await;
    let bounties = format!("/api/threads/{thread_id}/bounties");

    let zero = app.post(&bounties, &sponsor.access, json!({ "amount": 0 })).await;
    assert_eq!(zero.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let bounty: Value = app
        .post(&bounties, &sponsor.access, json!({ "amount": 5000, "currency": "usd" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(bounty["currency"], "USD");
    let award = format!("/api/bounties/{}/award", bounty["id"].as_str().unwrap());

    let listed: Value = app.get(&bounties, None).await.json().await.unwrap();
    assert_eq!(listed["activeTotal"]["USD"], 5000);

    let outsider = app
        .post(&award, &engineer.access, json!({ "solutionId": solution["id"] }))
        .await;
    assert_eq!(outsider.status(), StatusCode::FORBIDDEN);

    let awarded: Value = app
        .post(&award, &sponsor.access, json!({ "solutionId": solution["id"] }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(awarded["status"], "awarded");
    assert_eq!(app.reputation(&engineer).await, 25);

    let again = app
        .post(&award, &sponsor.access, json!({ "solutionId": solution["id"] }))
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let now = Utc::now();
    let stale = Bounty {
        id: Uuid::new_v4(),
        thread_id: thread_id.parse().unwrap(),
        sponsor_id: sponsor.id,
        amount: 100,
        currency: "USD".to_string(),
        status: BountyStatus::Active,
        deadline: Some(now - Duration::hours(1)),
        awarded_solution_id: None,
        awarded_to: None,
        created_at: now - Duration::days(2),
        updated_at: now - Duration::days(2),
    };
    app.db.insert_bounty(&stale).await.unwrap();

    let expired = app
        .post(
            &format!("/api/bounties/{}/award", stale.id),
            &sponsor.access,
            json!({ "solutionId": solution["id"] }),
        )
        .await;
    assert_eq!(expired.status(), StatusCode::CONFLICT);
    let stored = app.db.get_bounty(stale.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BountyStatus::Expired);

    let listed: Value = app.get(&bounties, None).await.json().await.unwrap();
    assert!(listed["activeTotal"].get("USD").is_none());
}

#[tokio::test]
async fn uploads_store_objects_and_thumbnails() {
    let app = spawn_app().await;
    let owner = app.register("swift").await;
    let stranger = app.register("swallow").await;
    let thread = app.create_thread(&owner, "Imagery from the last test range").await;
    let path = format!("/api/threads/{}/attachments", thread["id"].as_str().unwrap());

    let form = || {
        Form::new().part(
            "file",
            Part::bytes(png(1280, 640))
                .file_name("range photo.png")
                .mime_str("image/png")
                .unwrap(),
        )
    };

    let denied = app
        .client
        .post(app.url(&path))
        .bearer_auth(&stranger.access)
        .multipart(form())
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let uploaded = app
        .client
        .post(app.url(&path))
        .bearer_auth(&owner.access)
        .multipart(form())
        .send()
        .await
        .unwrap();
    assert_eq!(uploaded.status(), StatusCode::CREATED);
    let attachments: Value = uploaded.json().await.unwrap();
    let attachment = &attachments[0];
    assert_eq!(attachment["kind"], "image");
    assert_eq!(attachment["fileName"], "range_photo.png");
    assert!(attachment["thumbnailKey"].as_str().unwrap().ends_with("thumb.jpg"));
    assert_eq!(app.storage.len().await, 2);

    let id = attachment["id"].as_str().unwrap();
    let urls: Value = app
        .get(&format!("/api/attachments/{id}/url"), None)
        .await
        .json()
        .await
        .unwrap();
    assert!(urls["url"].as_str().unwrap().contains("range_photo.png"));
    assert!(urls["thumbnailUrl"].is_string());
    assert_eq!(urls["expiresIn"], 3600);

    let executable = app
        .client
        .post(app.url(&path))
        .bearer_auth(&owner.access)
        .multipart(Form::new().part(
            "file",
            Part::bytes(vec![0x4d, 0x5a, 0x90])
                .file_name("payload.exe")
                .mime_str("application/x-msdownload")
                .unwrap(),
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(executable.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(app.storage.len().await, 2);

    let removed = app.delete(&format!("/api/attachments/{id}"), &owner.access).await;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.storage.len().await, 0);
}

#[tokio::test]
async fn search_finds_synced_threads() {
    let app = spawn_app().await;
    let author = app.register("nighthawk").await;
    let thread = app.create_thread(&author, "Anti jam datalink for swarms").await;
    app.create_thread(&author, "Battery heating in arctic ops").await;

    sync_dirty(app.db.as_ref(), app.search.as_ref()).await.unwrap();

    let found: Value = app
        .get("/api/search?q=datalink", None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(found["total"], 1);
    assert_eq!(found["items"][0]["id"], thread["id"]);

    let filtered: Value = app
        .get("/api/search?q=datalink&category=power", None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(filtered["total"], 0);
}

#[tokio::test]
async fn concurrent_refreshes_rotate_once() {
    let app = spawn_app().await;
    let account = app.register("skylark").await;

    let (first, second) = tokio::join!(
        app.refresh(&account.refresh),
        app.refresh(&account.refresh)
    );
    let mut statuses = [first.status(), second.status()];
    statuses.sort();

    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNAUTHORIZED]);
}

#[tokio::test]
async fn banned_users_are_locked_out() {
    let app = spawn_app().await;
    let admin = app.register("eagle").await;
    let target = app.register("magpie").await;
    app.promote(&admin, Role::Admin).await;
    let ban = format!("/api/users/{}/ban", target.id);

    let plain = app.patch(&ban, &target.access, json!({ "banned": true })).await;
    assert_eq!(plain.status(), StatusCode::FORBIDDEN);

    let own = app
        .patch(
            &format!("/api/users/{}/ban", admin.id),
            &admin.access,
            json!({ "banned": true }),
        )
        .await;
    assert_eq!(own.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let banned: Value = app
        .patch(&ban, &admin.access, json!({ "banned": true }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(banned["banned"], true);
    assert_eq!(banned["fullName"], "Test Operator");

    let me = app.get("/api/auth/me", Some(&target.access)).await;
    assert_eq!(me.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.login("magpie").await.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.refresh(&target.refresh).await.status(), StatusCode::FORBIDDEN);

    let post = app
        .post(
            "/api/threads",
            &target.access,
            json!({ "title": "Still here", "content": "x", "category": "sensors" }),
        )
        .await;
    assert_eq!(post.status(), StatusCode::FORBIDDEN);

    app.patch(&ban, &admin.access, json!({ "banned": false })).await;
    let me = app.get("/api/auth/me", Some(&target.access)).await;
    assert_eq!(me.status(), StatusCode::OK);
    assert_eq!(app.login("magpie").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn profile_updates_keep_role_and_ban_state() {
    let app = spawn_app().await;
    let account = app.register("shrike").await;
    app.promote(&account, Role::Moderator).await;

    let updated: Value = app
        .patch("/api/users/me", &account.access, json!({ "bio": "ISR integrator" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(updated["bio"], "ISR integrator");
    assert_eq!(updated["role"], "moderator");
    assert_eq!(updated["fullName"], "Test Operator");

    let mut ban = UserPatch::new(Utc::now());
    ban.banned = Some(true);
    app.db.patch_user(account.id, &ban).await.unwrap();

    let mut profile = UserPatch::new(Utc::now());
    profile.full_name = Some("Renamed".to_string());
    app.db.patch_user(account.id, &profile).await.unwrap();

    let stored = app.db.get_user(account.id).await.unwrap().unwrap();
    assert!(stored.banned);
    assert_eq!(stored.bio.as_deref(), Some("ISR integrator"));
}

#[tokio::test]
async fn leaderboard_orders_by_reputation() {
    let app = spawn_app().await;
    let low = app.register("wren").await;
    let high = app.register("heron").await;
    let middle = app.register("egret").await;
    app.db.adjust_reputation(high.id, 40).await.unwrap();
    app.db.adjust_reputation(middle.id, 15).await.unwrap();
    app.db.adjust_reputation(low.id, -2).await.unwrap();

    let board: Value = app.get("/api/leaderboard", None).await.json().await.unwrap();
    let names: Vec<&str> = board
        .as_array()
        .unwrap()
        .iter()
        .map(|user| user["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["heron", "egret", "wren"]);
    assert!(board[0].get("email").is_none());

    let top: Value = app
        .get("/api/leaderboard?limit=1", None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(top.as_array().unwrap().len(), 1);
    assert_eq!(top[0]["username"], "heron");

    let clamped: Value = app
        .get("/api/leaderboard?limit=0", None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(clamped.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_the_accepted_solution_rolls_back() {
    let app = spawn_app().await;
    let author = app.register("ibis").await;
    let engineer = app.register("stork").await;

    let thread = app.create_thread(&author, "Vibration damping for EO mounts").await;
    let thread_id = thread["id"].as_str().unwrap();
    let solution = app.create_solution(&engineer, thread_id).await;
    let solution_id = solution["id"].as_str().unwrap();

    app.post(&format!("/api/solutions/{solution_id}/accept"), &author.access, json!({}))
        .await;
    assert_eq!(app.reputation(&engineer).await, 15);

    let foreign = app
        .delete(&format!("/api/solutions/{solution_id}"), &author.access)
        .await;
    assert_eq!(foreign.status(), StatusCode::FORBIDDEN);

    let removed = app
        .delete(&format!("/api/solutions/{solution_id}"), &engineer.access)
        .await;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);

    let thread: Value = app
        .get(&format!("/api/threads/{thread_id}"), None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(thread["solutionCount"], 0);
    assert_eq!(thread["acceptedSolutionId"], Value::Null);
    assert_eq!(app.reputation(&engineer).await, 0);

    let gone = app.get(&format!("/api/solutions/{solution_id}"), None).await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_vote_withdraws_it() {
    let app = spawn_app().await;
    let author = app.register("plover").await;
    let voter = app.register("curlew").await;
    let thread = app.create_thread(&author, "Counter drone net launcher").await;
    let path = format!("/api/threads/{}/vote", thread["id"].as_str().unwrap());

    app.post(&path, &voter.access, json!({ "type": "up" })).await;
    assert_eq!(app.reputation(&author).await, 1);

    let withdrawn: Value = app
        .delete(&path, &voter.access)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(withdrawn["previous"], "up");
    assert_eq!(withdrawn["current"], Value::Null);
    assert_eq!(withdrawn["votes"]["upvotes"], 0);
    assert_eq!(app.reputation(&author).await, 0);

    let again: Value = app
        .delete(&path, &voter.access)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(again["current"], Value::Null);
    assert_eq!(again["votes"]["upvotes"], 0);
    assert_eq!(app.reputation(&author).await, 0);
}

#[tokio::test]
async fn threads_sort_by_score_and_views() {
    let app = spawn_app().await;
    let author = app.register("gannet").await;
    let voter = app.register("fulmar").await;

    let voted = app.create_thread(&author, "Rotor icing detection").await;
    let viewed = app.create_thread(&author, "Spectrum survey payload").await;
    let voted_id = voted["id"].as_str().unwrap();
    let viewed_id = viewed["id"].as_str().unwrap();

    app.post(
        &format!("/api/threads/{voted_id}/vote"),
        &voter.access,
        json!({ "type": "up" }),
    )
    .await;
    for _ in 0..3 {
        app.get(&format!("/api/threads/{viewed_id}"), None).await;
    }

    let top: Value = app
        .get("/api/threads?sort=top", None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(top["items"][0]["id"], voted_id);
    assert_eq!(top["items"][1]["id"], viewed_id);

    let views: Value = app
        .get("/api/threads?sort=views", None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(views["items"][0]["id"], viewed_id);
    assert_eq!(views["items"][0]["views"], 3);
    assert_eq!(views["items"][1]["id"], voted_id);
}

#[tokio::test]
async fn moderators_cannot_reset_solutions_to_pending() {
    let app = spawn_app().await;
    let author = app.register("tern").await;
    let moderator = app.register("skua").await;
    app.promote(&moderator, Role::Moderator).await;

    let thread = app.create_thread(&author, "Acoustic detection of small UAS").await;
    let solution = app
        .create_solution(&moderator, thread["id"].as_str().unwrap())
        .await;
    let path = format!("/api/solutions/{}/status", solution["id"].as_str().unwrap());

    let approved: Value = app
        .patch(&path, &moderator.access, json!({ "status": "approved" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(approved["status"], "approved");

    let pending = app
        .patch(&path, &moderator.access, json!({ "status": "pending" }))
        .await;
    assert_eq!(pending.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let stored: Value = app
        .get(&format!("/api/solutions/{}", solution["id"].as_str().unwrap()), None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(stored["status"], "approved");
}

#[tokio::test]
async fn bounty_totals_cannot_overflow() {
    let app = spawn_app().await;
    let sponsor = app.register("pelican").await;
    let thread = app.create_thread(&sponsor, "Satcom on a group 2 airframe").await;
    let bounties = format!("/api/threads/{}/bounties", thread["id"].as_str().unwrap());

    let max = app
        .post(&bounties, &sponsor.access, json!({ "amount": u64::MAX }))
        .await;
    assert_eq!(max.status(), StatusCode::CREATED);

    let over = app.post(&bounties, &sponsor.access, json!({ "amount": 1 })).await;
    assert_eq!(over.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let other = app
        .post(&bounties, &sponsor.access, json!({ "amount": 1, "currency": "EUR" }))
        .await;
    assert_eq!(other.status(), StatusCode::CREATED);

    let listed = app.get(&bounties, None).await;
    assert_eq!(listed.status(), StatusCode::OK);
    let listed: Value = listed.json().await.unwrap();
    assert_eq!(listed["activeTotal"]["USD"], u64::MAX);
    assert_eq!(listed["activeTotal"]["EUR"], 1);
    assert_eq!(listed["bounties"].as_array().unwrap().len(), 2);
}
