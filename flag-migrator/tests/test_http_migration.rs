use std::sync::Arc;
use std::time::Duration;

use flag_migrator::load::MigrationStatus;
use flag_migrator::migration::Migration;
use flag_migrator::translate::TranslationSettings;
use httpmock::prelude::*;
use migration_common::destination::statsig::StatsigClient;
use migration_common::http::ClientSettings;
use migration_common::retry::RetryPolicy;
use migration_common::source::launchdarkly::LaunchDarklyClient;
use serde_json::json;

fn settings() -> ClientSettings {
    ClientSettings {
        timeout: Duration::from_secs(5),
        requests_per_second: 1000,
        page_size: 50,
        retry_policy: RetryPolicy::no_retries(),
    }
}

#[tokio::test]
async fn test_migrates_a_flag_between_live_apis() {
    let launchdarkly = MockServer::start_async().await;
    let statsig = MockServer::start_async().await;

    launchdarkly
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v2/flags/web")
                .query_param("summary", "0")
                .header("authorization", "api-ld");
            then.status(200).json_body(json!({
                "items": [{"key": "new-checkout", "name": "New checkout"}],
                "totalCount": 1
            }));
        })
        .await;
    launchdarkly
        .mock_async(|when, then| {
            when.method(GET).path("/api/v2/flags/web/new-checkout");
            then.status(200).json_body(json!({
                "key": "new-checkout",
                "name": "New checkout",
                "kind": "boolean",
                "temporary": true,
                "tags": ["payments"],
                "variations": [{"value": true}, {"value": false}],
                "environments": {
                    "production": {
                        "on": true,
                        "offVariation": 1,
                        "fallthrough": {"rollout": {"variations": [
                            {"variation": 0, "weight": 25000},
                            {"variation": 1, "weight": 75000}
                        ]}},
                        "rules": [{
                            "description": "Staff",
                            "variation": 0,
                            "clauses": [{"attribute": "email", "op": "endsWith", "values": ["@acme.com"], "negate": false}]
                        }],
                        "targets": [{"values": ["alice"], "variation": 0}],
                        "_site": {"href": "/web/production/features/new-checkout"}
                    }
                }
            }));
        })
        .await;

    statsig
        .mock_async(|when, then| {
            when.method(GET)
                .path("/console/v1/tags")
                .header("statsig-api-key", "console-secret");
            then.status(200)
                .json_body(json!({"data": [{"id": "t1", "name": "Migration Script"}], "pagination": {"nextPage": null}}));
        })
        .await;
    let create_tags = statsig
        .mock_async(|when, then| {
            when.method(POST).path("/console/v1/tags");
            then.status(201)
                .json_body(json!({"data": {"id": "t2", "name": "created"}}));
        })
        .await;
    statsig
        .mock_async(|when, then| {
            when.method(GET)
                .path("/console/v1/gates")
                .query_param("tags", "Migration Script");
            then.status(200).json_body(json!({
                "data": [{"id": "stale", "name": "old-flag"}],
                "pagination": {"nextPage": null}
            }));
        })
        .await;
    let delete_stale = statsig
        .mock_async(|when, then| {
            when.method(DELETE).path("/console/v1/gates/stale");
            then.status(200).json_body(json!({"message": "deleted"}));
        })
        .await;
    let create_gate = statsig
        .mock_async(|when, then| {
            when.method(POST)
                .path("/console/v1/gates")
                .json_body_partial(
                    json!({
                        "name": "new-checkout",
                        "type": "TEMPORARY",
                        "isEnabled": true,
                        "tags": ["Migration Script", "source-project:web", "payments"]
                    })
                    .to_string(),
                );
            then.status(201).json_body(json!({
                "data": {"id": "new-checkout", "name": "new-checkout", "createdTime": 1700000000000i64}
            }));
        })
        .await;
    let create_overrides = statsig
        .mock_async(|when, then| {
            when.method(POST)
                .path("/console/v1/gates/new-checkout/overrides")
                .json_body(json!({
                    "passingUserIDs": [],
                    "failingUserIDs": [],
                    "environmentOverrides": [{
                        "environment": "production",
                        "unitID": "userID",
                        "passingIDs": ["alice"],
                        "failingIDs": []
                    }]
                }));
            then.status(201).json_body(json!({"data": {}}));
        })
        .await;

    let source = LaunchDarklyClient::new(&launchdarkly.base_url(), "api-ld", &settings()).unwrap();
    let destination =
        StatsigClient::new(&statsig.url("/console/v1"), "console-secret", &settings()).unwrap();
    let migration = Migration::new(
        Arc::new(source),
        Arc::new(destination),
        TranslationSettings {
            migration_tag: "Migration Script".to_string(),
            ..Default::default()
        },
    );

    let report = migration.run(&["web".to_string()]).await.unwrap();

    delete_stale.assert_async().await;
    create_gate.assert_async().await;
    create_overrides.assert_async().await;
    // "source-project:web" and "payments" are missing, the migration tag is not.
    assert_eq!(create_tags.hits_async().await, 2);

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status(), MigrationStatus::Successful);
    assert_eq!(report.results[0].gate().unwrap().id, "new-checkout");
}
