use std::collections::HashMap;

use futures::future::try_join_all;
use indexmap::IndexSet;
use migration_common::error::ClientError;
use migration_common::source::{SourceClient, SourceFlag};
use tracing::{info, instrument, warn};

pub const PROVENANCE_TAG_PREFIX: &str = "source-project:";

/// Everything read from the source in one run.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub flags: Vec<SourceFlag>,
    /// Union of the environment keys of every flag, in first-seen order.
    pub environments: IndexSet<String>,
}

/// Fetch the full definition of every flag in `projects`.
///
/// Project listings run concurrently, then every flag detail is fetched
/// concurrently. The first failure aborts the extraction.
#[instrument(skip_all, fields(projects = projects.len()))]
pub async fn extract(
    client: &dyn SourceClient,
    projects: &[String],
) -> Result<Extraction, ClientError> {
    let projects: IndexSet<&str> = projects.iter().map(String::as_str).collect();

    let listings =
        try_join_all(projects.iter().map(|project| list_project(client, *project))).await?;
    let mut flags = try_join_all(
        listings
            .into_iter()
            .flatten()
            .map(|(project, key)| fetch_flag(client, project, key)),
    )
    .await?;

    qualify_duplicate_keys(&mut flags);
    let environments = flags
        .iter()
        .flat_map(|flag| flag.environments.keys().cloned())
        .collect();

    Ok(Extraction {
        flags,
        environments,
    })
}

async fn list_project<'a>(
    client: &dyn SourceClient,
    project: &'a str,
) -> Result<Vec<(&'a str, String)>, ClientError> {
    let summaries = client.list_flags(project).await?;
    info!("fetched {} flags from project {}", summaries.len(), project);
    Ok(summaries
        .into_iter()
        .map(|summary| (project, summary.key))
        .collect())
}

async fn fetch_flag(
    client: &dyn SourceClient,
    project: &str,
    key: String,
) -> Result<SourceFlag, ClientError> {
    let flag = client.get_flag(project, &key).await?;
    Ok(attach_provenance(flag, project))
}

fn attach_provenance(mut flag: SourceFlag, project: &str) -> SourceFlag {
    let tag = format!("{PROVENANCE_TAG_PREFIX}{project}");
    if !flag.tags.contains(&tag) {
        flag.tags.insert(0, tag);
    }
    flag.project = project.to_owned();
    flag
}

/// Keys must be unique on the destination, so any key shared by several
/// projects is prefixed with its project on every occurrence. A prefixed key
/// can clash with a key another project already uses, in which case that
/// flag is prefixed too. Each flag is prefixed at most once.
fn qualify_duplicate_keys(flags: &mut [SourceFlag]) {
    let mut qualified = vec![false; flags.len()];
    loop {
        let occurrences = key_occurrences(flags);
        let mut changed = false;
        for (flag, qualified) in flags.iter_mut().zip(qualified.iter_mut()) {
            if !*qualified && occurrences.get(&flag.key).is_some_and(|count| *count > 1) {
                flag.key = format!("{}.{}", flag.project, flag.key);
                *qualified = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for (key, count) in key_occurrences(flags) {
        if count > 1 {
            warn!("{} flags share the key {} after project prefixing", count, key);
        }
    }
}

fn key_occurrences(flags: &[SourceFlag]) -> HashMap<String, usize> {
    let mut occurrences = HashMap::new();
    for flag in flags {
        *occurrences.entry(flag.key.clone()).or_default() += 1;
    }
    occurrences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{boolean_flag, environment, InMemorySource};

    fn projects(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_qualified_with_their_project() {
        let source = InMemorySource::default()
            .with_flag("A", boolean_flag("checkout"))
            .with_flag("A", boolean_flag("search"))
            .with_flag("B", boolean_flag("checkout"))
            .with_flag("B", boolean_flag("billing"));

        let extraction = extract(&source, &projects(&["A", "B"])).await.unwrap();

        let keys: Vec<&str> = extraction.flags.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["A.checkout", "search", "B.checkout", "billing"]);
    }

    #[tokio::test]
    async fn test_qualified_key_never_collides_with_an_existing_key() {
        let source = InMemorySource::default()
            .with_flag("A", boolean_flag("checkout"))
            .with_flag("B", boolean_flag("checkout"))
            .with_flag("C", boolean_flag("A.checkout"));

        let extraction = extract(&source, &projects(&["A", "B", "C"])).await.unwrap();

        let keys: Vec<&str> = extraction.flags.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["A.checkout", "B.checkout", "C.A.checkout"]);
    }

    #[tokio::test]
    async fn test_provenance_tag_is_added_once() {
        let mut tagged = boolean_flag("search");
        tagged.tags = vec!["ui".to_string(), "source-project:web".to_string()];
        let mut untagged = boolean_flag("checkout");
        untagged.tags = vec!["payments".to_string()];
        let source = InMemorySource::default()
            .with_flag("web", tagged)
            .with_flag("web", untagged);

        let extraction = extract(&source, &projects(&["web"])).await.unwrap();

        assert_eq!(extraction.flags[0].tags, vec!["ui", "source-project:web"]);
        assert_eq!(
            extraction.flags[1].tags,
            vec!["source-project:web", "payments"]
        );
        assert!(extraction.flags.iter().all(|f| f.project == "web"));
    }

    #[tokio::test]
    async fn test_environments_are_the_union_in_first_seen_order() {
        let mut first = boolean_flag("checkout");
        first.environments.insert("test".to_string(), environment(true));
        first.environments.insert("production".to_string(), environment(true));
        let mut second = boolean_flag("search");
        second.environments.insert("production".to_string(), environment(true));
        second.environments.insert("staging".to_string(), environment(false));
        let source = InMemorySource::default()
            .with_flag("web", first)
            .with_flag("mobile", second);

        let extraction = extract(&source, &projects(&["web", "mobile"])).await.unwrap();

        let environments: Vec<&str> = extraction.environments.iter().map(String::as_str).collect();
        assert_eq!(environments, vec!["test", "production", "staging"]);
    }

    #[tokio::test]
    async fn test_repeated_project_is_extracted_once() {
        let source = InMemorySource::default().with_flag("web", boolean_flag("checkout"));

        let extraction = extract(&source, &projects(&["web", "web"])).await.unwrap();

        assert_eq!(extraction.flags.len(), 1);
        assert_eq!(extraction.flags[0].key, "checkout");
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let source = InMemorySource::default()
            .with_flag("web", boolean_flag("checkout"))
            .with_failing_project("mobile");

        let err = extract(&source, &projects(&["web", "mobile"]))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_detail_failure_is_fatal() {
        let source = InMemorySource::default()
            .with_flag("web", boolean_flag("checkout"))
            .with_flag("web", boolean_flag("search"))
            .with_failing_flag("search");

        assert!(extract(&source, &projects(&["web"])).await.is_err());
    }
}
