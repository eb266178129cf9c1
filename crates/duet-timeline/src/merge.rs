//! Merging per-network post lists into one feed.

use std::collections::HashSet;

use duet_core::Post;

/// Concatenate lists in order, keep the first occurrence of each id and
/// sort newest first.
///
/// The sort is stable, so posts with equal timestamps keep their
/// concatenation order.
pub fn merge<I, L>(lists: I) -> Vec<Post>
where
    I: IntoIterator<Item = L>,
    L: IntoIterator<Item = Post>,
{
    let mut seen = HashSet::new();
    let mut merged: Vec<Post> = lists
        .into_iter()
        .flatten()
        .filter(|post| seen.insert(post.id.clone()))
        .collect();
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use duet_core::{Author, Engagement, Network, StyledText, UndoTokens, ViewerState};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn post(id: &str, minute: i64, text: &str) -> Post {
        let (network, native) = Network::split_global_id(id).unwrap();
        Post {
            id: id.to_string(),
            network,
            instance: "test".to_string(),
            native_id: native.to_string(),
            native_cid: None,
            author: Author {
                id: "a".to_string(),
                handle: "a.test".to_string(),
                display_name: None,
                avatar: None,
            },
            created_at: at(minute),
            text: StyledText::plain(text),
            media: Vec::new(),
            quote: None,
            content_warning: None,
            labels: Vec::new(),
            counts: Engagement::default(),
            reply_parent_id: None,
            reposted_by: None,
            undo: UndoTokens::default(),
            viewer: ViewerState::default(),
        }
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute)
    }

    #[test]
    fn test_merge_interleaves_networks() {
        let mastodon = vec![post("mastodon:3", 30, ""), post("mastodon:1", 10, "")];
        let bluesky = vec![post("bluesky:2", 20, ""), post("bluesky:0", 0, "")];

        let ids: Vec<String> = merge([mastodon, bluesky]).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["mastodon:3", "bluesky:2", "mastodon:1", "bluesky:0"]);
    }

    #[test]
    fn test_merge_keeps_first_duplicate() {
        let first = vec![post("mastodon:1", 10, "first")];
        let second = vec![post("mastodon:1", 50, "second")];

        let merged = merge([first, second]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text.text, "first");
        assert_eq!(merged[0].created_at, at(10));
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge(Vec::<Vec<Post>>::new()).is_empty());
    }

    fn arb_posts() -> impl Strategy<Value = Vec<(u8, i64, u16)>> {
        // (id, minute, tag) with a small id space so duplicates are common
        prop::collection::vec((0u8..12, 0i64..500, any::<u16>()), 0..40)
    }

    proptest! {
        #[test]
        fn prop_merge_ids_unique_and_sorted(a in arb_posts(), b in arb_posts()) {
            let to_posts = |raw: &[(u8, i64, u16)]| -> Vec<Post> {
                raw.iter()
                    .map(|(id, minute, tag)| post(&format!("mastodon:{id}"), *minute, &tag.to_string()))
                    .collect()
            };
            let lists = vec![to_posts(&a), to_posts(&b)];
            let merged = merge(lists.clone());

            let mut ids = HashSet::new();
            for p in &merged {
                prop_assert!(ids.insert(p.id.clone()), "duplicate id {}", p.id);
            }
            for pair in merged.windows(2) {
                prop_assert!(pair[0].created_at >= pair[1].created_at);
            }

            let all: Vec<&Post> = lists.iter().flatten().collect();
            let distinct: HashSet<&str> = all.iter().map(|p| p.id.as_str()).collect();
            prop_assert_eq!(merged.len(), distinct.len());

            for p in &merged {
                let first = all.iter().find(|q| q.id == p.id).unwrap();
                prop_assert_eq!(&p.text.text, &first.text.text);
                prop_assert_eq!(p.created_at, first.created_at);
            }
        }
    }
}
