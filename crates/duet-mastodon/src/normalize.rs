//! Map Mastodon entities onto the canonical model.
//!
//! Every function here is pure. Statuses that fail to decode are logged at
//! debug level and dropped so one bad entry never fails a whole page.

use std::collections::HashMap;
use std::sync::LazyLock;

use duet_core::filter::ReplyCandidate;
use duet_core::richtext::from_html;
use duet_core::thread::{AncestorNode, ReplyNode, parent_chain};
use duet_core::{
    Author, Engagement, Media, MediaKind, Network, Post, QuotedPost, SpanKind, UndoTokens,
    UnifiedUser, ViewerState,
};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::{Account, MediaAttachment, Relationship, Status};

/// Label added to posts the author marked sensitive.
pub const SENSITIVE_LABEL: &str = "sensitive";

static STATUS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://([^/\s?#]+)/(?:@[^/\s?#]+|users/[^/\s?#]+/statuses)/(\d+)/?$")
        .expect("valid regex")
});

fn decode<T: DeserializeOwned>(value: &Value, what: &str) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(error = %e, what, "skipping malformed item");
            None
        }
    }
}

/// `acct` qualified with the instance host for local accounts.
pub fn qualified_handle(account: &Account, instance: &str) -> String {
    if account.acct.contains('@') || instance.is_empty() {
        account.acct.clone()
    } else {
        format!("{}@{}", account.acct, instance)
    }
}

pub fn author(account: &Account, instance: &str) -> Author {
    Author {
        id: account.id.clone(),
        handle: qualified_handle(account, instance),
        display_name: Some(account.display_name.clone()).filter(|n| !n.trim().is_empty()),
        avatar: account.avatar.clone(),
    }
}

fn media(attachment: &MediaAttachment) -> Option<Media> {
    let url = attachment
        .url
        .clone()
        .or_else(|| attachment.remote_url.clone())?;
    Some(Media {
        url,
        preview_url: attachment.preview_url.clone(),
        kind: MediaKind::from_content_type(&attachment.kind),
        alt: attachment
            .description
            .clone()
            .filter(|d| !d.trim().is_empty()),
    })
}

/// Normalize a status, surfacing the boosted status for reblogs.
///
/// A reblog keeps the id of the status it boosts, carries the booster in
/// `reposted_by` and takes the boost time as its feed time.
pub fn post_from_status(status: &Status, instance: &str) -> Post {
    let surface = status.reblog.as_deref().unwrap_or(status);

    let mut labels = Vec::new();
    if surface.sensitive {
        labels.push(SENSITIVE_LABEL.to_string());
    }

    let quote = surface
        .quote
        .as_ref()
        .and_then(|q| q.quoted_status.as_ref())
        .and_then(|v| decode::<Status>(v, "quoted status"))
        .map(|q| QuotedPost::from(&post_from_status(&q, instance)));

    Post {
        id: Network::Mastodon.global_id(&surface.id),
        network: Network::Mastodon,
        instance: instance.to_string(),
        native_id: surface.id.clone(),
        native_cid: None,
        author: author(&surface.account, instance),
        created_at: status.created_at,
        text: from_html(&surface.content),
        media: surface.media_attachments.iter().filter_map(media).collect(),
        quote,
        content_warning: Some(surface.spoiler_text.trim().to_string()).filter(|s| !s.is_empty()),
        labels,
        counts: Engagement {
            replies: surface.replies_count,
            reposts: surface.reblogs_count,
            likes: surface.favourites_count,
        },
        reply_parent_id: surface
            .in_reply_to_id
            .as_deref()
            .map(|id| Network::Mastodon.global_id(id)),
        reposted_by: status
            .reblog
            .is_some()
            .then(|| author(&status.account, instance)),
        undo: UndoTokens::default(),
        viewer: ViewerState {
            liked: surface.favourited.unwrap_or(false),
            reposted: surface.reblogged.unwrap_or(false),
            bookmarked: surface.bookmarked.unwrap_or(false),
        },
    }
}

/// Normalize a raw status.
pub fn post_from_value(value: &Value, instance: &str) -> Option<Post> {
    let status: Status = decode(value, "status")?;
    Some(post_from_status(&status, instance))
}

/// Normalize one home timeline status and extract what the reply filter
/// needs.
///
/// Statuses do not say whether the viewer follows the parent's author, so
/// that flag is always left unknown.
pub fn timeline_item(value: &Value, instance: &str) -> Option<(Post, ReplyCandidate)> {
    let status: Status = decode(value, "status")?;
    let candidate = ReplyCandidate {
        author_id: status.account.id.clone(),
        is_repost: status.reblog.is_some(),
        declares_reply: status.in_reply_to_id.is_some(),
        parent_author_id: status.in_reply_to_account_id.clone(),
        parent_author_following: None,
    };
    Some((post_from_status(&status, instance), candidate))
}

/// Normalize a list of statuses without filtering.
pub fn statuses(values: &[Value], instance: &str) -> Vec<Post> {
    values
        .iter()
        .filter_map(|v| post_from_value(v, instance))
        .collect()
}

pub fn profile(account: &Account, relationship: Option<&Relationship>, instance: &str) -> UnifiedUser {
    UnifiedUser {
        id: Network::Mastodon.global_id(&account.id),
        network: Network::Mastodon,
        native_id: account.id.clone(),
        handle: qualified_handle(account, instance),
        display_name: Some(account.display_name.clone()).filter(|n| !n.trim().is_empty()),
        avatar: account.avatar.clone(),
        banner: account.header.clone(),
        bio: from_html(&account.note),
        followers_count: account.followers_count,
        following_count: account.following_count,
        posts_count: account.statuses_count,
        is_following: relationship.map(|r| r.following),
        is_followed_by: relationship.map(|r| r.followed_by),
        follow_token: None,
    }
}

/// Context descendants as reply nodes keyed by status id.
pub fn reply_nodes(descendants: &[Value], instance: &str) -> Vec<ReplyNode> {
    descendants
        .iter()
        .filter_map(|v| decode::<Status>(v, "descendant"))
        .map(|status| ReplyNode {
            native_id: status.id.clone(),
            parent_native_id: status.in_reply_to_id.clone(),
            post: post_from_status(&status, instance),
        })
        .collect()
}

/// The parent chain of a status from its context ancestors, immediate parent
/// first.
///
/// Ancestors missing from the context (deleted or hidden) end the chain.
pub fn ancestor_chain(
    first_parent: Option<String>,
    ancestors: &[Value],
    instance: &str,
) -> Vec<AncestorNode<Post>> {
    let mut by_id: HashMap<String, Status> = ancestors
        .iter()
        .filter_map(|v| decode::<Status>(v, "ancestor"))
        .map(|s| (s.id.clone(), s))
        .collect();

    parent_chain(first_parent, |id| {
        let status = by_id.remove(id)?;
        let parent = status.in_reply_to_id.clone();
        Some((post_from_status(&status, instance), parent))
    })
    .collect()
}

/// A linked status: the instance that serves it and its id there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLink {
    pub url: String,
    pub host: String,
    pub id: String,
}

impl StatusLink {
    /// Parse a status URL of the form `https://host/@user/<id>` or
    /// `https://host/users/<user>/statuses/<id>`.
    pub fn parse(url: &str) -> Option<Self> {
        let caps = STATUS_URL_RE.captures(url.trim())?;
        Some(Self {
            url: url.trim().to_string(),
            host: caps[1].to_ascii_lowercase(),
            id: caps[2].to_string(),
        })
    }
}

/// The first status permalink linked from the post text.
pub fn quote_link(post: &Post) -> Option<StatusLink> {
    post.text.spans.iter().find_map(|span| match &span.kind {
        SpanKind::Link { url } => StatusLink::parse(url),
        _ => None,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    pub(crate) fn account(id: &str, acct: &str) -> Value {
        json!({
            "id": id,
            "username": acct.split('@').next().unwrap(),
            "acct": acct,
            "display_name": "",
            "avatar": format!("https://files.example/{id}.png"),
            "note": "",
        })
    }

    pub(crate) fn status(id: &str, account_id: &str, acct: &str, content: &str) -> Value {
        json!({
            "id": id,
            "uri": format!("https://social.example/users/{acct}/statuses/{id}"),
            "url": format!("https://social.example/@{acct}/{id}"),
            "created_at": "2024-05-01T10:00:00.000Z",
            "account": account(account_id, acct),
            "content": content,
            "spoiler_text": "",
            "sensitive": false,
            "in_reply_to_id": null,
            "in_reply_to_account_id": null,
            "reblog": null,
            "media_attachments": [],
            "replies_count": 0,
            "reblogs_count": 2,
            "favourites_count": 5,
            "favourited": false,
            "reblogged": false,
            "bookmarked": false
        })
    }

    pub(crate) fn reply(id: &str, account_id: &str, acct: &str, parent: &str, parent_account: &str) -> Value {
        let mut value = status(id, account_id, acct, "<p>re</p>");
        value["in_reply_to_id"] = json!(parent);
        value["in_reply_to_account_id"] = json!(parent_account);
        value
    }

    #[test]
    fn test_status_maps_html_and_counts() {
        let value = status(
            "101",
            "1",
            "alice",
            r#"<p>hi <span class="h-card"><a href="https://other.example/@bob" class="u-url mention">@<span>bob</span></a></span> &amp; <a href="https://other.example/tags/rust" class="mention hashtag" rel="tag">#<span>rust</span></a></p>"#,
        );
        let post = post_from_value(&value, "social.example").unwrap();

        assert_eq!(post.id, "mastodon:101");
        assert_eq!(post.author.handle, "alice@social.example");
        assert_eq!(post.text.text, "hi @bob & #rust");
        assert_eq!(post.text.spans.len(), 2);
        assert!(matches!(post.text.spans[0].kind, SpanKind::Mention { .. }));
        assert!(matches!(post.text.spans[1].kind, SpanKind::Tag { .. }));
        assert_eq!(post.counts.likes, Some(5));
        assert_eq!(post.counts.reposts, Some(2));
    }

    #[test]
    fn test_reblog_surfaces_original() {
        let mut outer = status("900", "7", "carol", "");
        outer["created_at"] = json!("2024-05-02T08:00:00.000Z");
        outer["reblog"] = status("101", "1", "alice@remote.example", "<p>orig</p>");

        let (post, candidate) = timeline_item(&outer, "social.example").unwrap();
        assert_eq!(post.id, "mastodon:101");
        assert_eq!(post.author.handle, "alice@remote.example");
        assert_eq!(post.reposted_by.as_ref().unwrap().handle, "carol@social.example");
        assert_eq!(post.created_at.to_rfc3339(), "2024-05-02T08:00:00+00:00");
        assert!(candidate.is_repost);
        assert_eq!(candidate.author_id, "7");
    }

    #[test]
    fn test_reply_candidate_uses_parent_account() {
        let value = reply("102", "2", "bob", "101", "1");
        let (post, candidate) = timeline_item(&value, "social.example").unwrap();

        assert_eq!(post.reply_parent_id.as_deref(), Some("mastodon:101"));
        assert!(candidate.declares_reply);
        assert_eq!(candidate.parent_author_id.as_deref(), Some("1"));
        assert_eq!(candidate.parent_author_following, None);
    }

    #[test]
    fn test_spoiler_and_sensitive() {
        let mut value = status("101", "1", "alice", "<p>spoilers</p>");
        value["spoiler_text"] = json!("finale");
        value["sensitive"] = json!(true);
        value["media_attachments"] = json!([
            { "id": "m1", "type": "gifv", "url": "https://files.example/a.mp4", "preview_url": "https://files.example/a.png", "description": "" }
        ]);

        let post = post_from_value(&value, "social.example").unwrap();
        assert_eq!(post.content_warning.as_deref(), Some("finale"));
        assert_eq!(post.labels, vec![SENSITIVE_LABEL.to_string()]);
        assert_eq!(post.media[0].kind, MediaKind::Gif);
        assert_eq!(post.media[0].alt, None);
    }

    #[test]
    fn test_explicit_quote() {
        let mut value = status("102", "2", "bob", "<p>look</p>");
        value["quote"] = json!({ "state": "accepted", "quoted_status": status("101", "1", "alice", "<p>q</p>") });

        let post = post_from_value(&value, "social.example").unwrap();
        let quote = post.quote.unwrap();
        assert_eq!(quote.id, "mastodon:101");
        assert_eq!(quote.text.text, "q");
    }

    #[test]
    fn test_malformed_status_is_skipped() {
        let values = vec![json!({ "id": "1" }), status("2", "1", "alice", "<p>ok</p>")];
        let posts = statuses(&values, "social.example");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].native_id, "2");
    }

    #[test]
    fn test_ancestor_chain_stops_at_missing_parent() {
        let ancestors = vec![
            reply("2", "1", "alice", "1", "9"),
            reply("3", "2", "bob", "2", "1"),
        ];
        let chain = ancestor_chain(Some("3".to_string()), &ancestors, "social.example");

        let ids: Vec<_> = chain
            .iter()
            .map(|n| match n {
                AncestorNode::Post(p) => p.native_id.clone(),
                AncestorNode::Blocked => "blocked".to_string(),
                AncestorNode::NotFound => "missing".to_string(),
            })
            .collect();
        assert_eq!(ids, vec!["3", "2", "missing"]);
    }

    #[test]
    fn test_status_link_parse() {
        assert_eq!(
            StatusLink::parse("https://Other.Example/@bob/109876"),
            Some(StatusLink {
                url: "https://Other.Example/@bob/109876".to_string(),
                host: "other.example".to_string(),
                id: "109876".to_string(),
            })
        );
        assert!(StatusLink::parse("https://other.example/users/bob/statuses/42").is_some());
        assert!(StatusLink::parse("https://other.example/@bob").is_none());
        assert!(StatusLink::parse("https://other.example/tags/rust").is_none());
    }

    #[test]
    fn test_profile_with_relationship() {
        let mut value = account("1", "alice");
        value["note"] = json!("<p>hello</p>");
        value["followers_count"] = json!(10);
        let account: Account = serde_json::from_value(value).unwrap();
        let relationship = Relationship {
            id: "1".to_string(),
            following: true,
            followed_by: false,
        };

        let user = profile(&account, Some(&relationship), "social.example");
        assert_eq!(user.id, "mastodon:1");
        assert_eq!(user.handle, "alice@social.example");
        assert_eq!(user.bio.text, "hello");
        assert_eq!(user.followers_count, Some(10));
        assert_eq!(user.is_following, Some(true));
        assert_eq!(user.is_followed_by, Some(false));
    }
}
