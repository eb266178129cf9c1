//! Map AppView payloads onto the canonical model.
//!
//! Every function here is pure. Items that fail to decode are logged at
//! debug level and dropped so one bad entry never fails a whole page.

use chrono::{DateTime, Utc};
use duet_core::filter::ReplyCandidate;
use duet_core::richtext::{ByteFacet, FacetFeature, from_byte_facets};
use duet_core::thread::{AncestorNode, MAX_ANCESTORS, ReplyNode};
use duet_core::{
    Author, Engagement, Media, MediaKind, Network, Post, QuotedPost, SpanKind, UndoTokens,
    UnifiedUser, ViewerState,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::types::{
    FeedViewPost, PostRecord, PostView, ProfileViewBasic, ProfileViewDetailed, ReasonRepost,
    lex, type_of,
};
use crate::{AtUri, Facet, Permalink};

/// Labels that warrant hiding a post behind a content warning.
const WARNING_LABELS: [&str; 5] = ["porn", "sexual", "nudity", "graphic-media", "gore"];

fn decode<T: DeserializeOwned>(value: &Value, what: &str) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(error = %e, what, "skipping malformed item");
            None
        }
    }
}

pub fn author(profile: &ProfileViewBasic) -> Author {
    Author {
        id: profile.did.clone(),
        handle: profile.handle.clone(),
        display_name: profile.display_name.clone().filter(|n| !n.is_empty()),
        avatar: profile.avatar.clone(),
    }
}

fn byte_facets(facets: &[Facet]) -> Vec<ByteFacet> {
    let mut out = Vec::new();
    for facet in facets {
        for feature in &facet.features {
            let str_field =
                |key: &str| feature.get(key).and_then(Value::as_str).map(str::to_string);
            let feature = match type_of(feature) {
                Some(lex::FACET_LINK) => str_field("uri").map(|uri| FacetFeature::Link { uri }),
                Some(lex::FACET_MENTION) => {
                    str_field("did").map(|did| FacetFeature::Mention { did })
                }
                Some(lex::FACET_TAG) => str_field("tag").map(|tag| FacetFeature::Tag { tag }),
                _ => None,
            };
            if let Some(feature) = feature {
                out.push(ByteFacet {
                    byte_start: facet.index.byte_start,
                    byte_end: facet.index.byte_end,
                    feature,
                });
            }
        }
    }
    out
}

fn image_media(view: &Value) -> Vec<Media> {
    let Some(images) = view.get("images").and_then(Value::as_array) else {
        return Vec::new();
    };
    images
        .iter()
        .filter_map(|image| {
            let url = image.get("fullsize").and_then(Value::as_str)?;
            Some(Media {
                url: url.to_string(),
                preview_url: image.get("thumb").and_then(Value::as_str).map(str::to_string),
                alt: non_empty(image.get("alt")),
                kind: MediaKind::Image,
            })
        })
        .collect()
}

fn video_media(view: &Value) -> Vec<Media> {
    let Some(url) = view.get("playlist").and_then(Value::as_str) else {
        return Vec::new();
    };
    vec![Media {
        url: url.to_string(),
        preview_url: view
            .get("thumbnail")
            .and_then(Value::as_str)
            .map(str::to_string),
        alt: non_empty(view.get("alt")),
        kind: MediaKind::Video,
    }]
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Media attached to an embed view, looking inside `recordWithMedia`.
fn embed_media(embed: &Value) -> Vec<Media> {
    match type_of(embed) {
        Some(lex::EMBED_IMAGES) => image_media(embed),
        Some(lex::EMBED_VIDEO) => video_media(embed),
        Some(lex::EMBED_RECORD_WITH_MEDIA) => {
            embed.get("media").map(embed_media).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// The `viewRecord` of a quote embed, if the embed quotes a visible post.
fn quoted_record(embed: &Value) -> Option<&Value> {
    let record = match type_of(embed) {
        Some(lex::EMBED_RECORD) => embed.get("record")?,
        Some(lex::EMBED_RECORD_WITH_MEDIA) => embed.get("record")?.get("record")?,
        _ => return None,
    };
    (type_of(record) == Some(lex::EMBED_VIEW_RECORD)).then_some(record)
}

fn quote(record: &Value, instance: &str) -> Option<QuotedPost> {
    let uri = record.get("uri").and_then(Value::as_str)?;
    let profile: ProfileViewBasic = decode(record.get("author")?, "quote author")?;
    let body: PostRecord = decode(record.get("value")?, "quote record")?;
    let indexed_at = record
        .get("indexedAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));
    let created_at = body.created_at.or(indexed_at)?;
    let media = record
        .get("embeds")
        .and_then(Value::as_array)
        .map(|embeds| embeds.iter().flat_map(embed_media).collect())
        .unwrap_or_default();
    let labels = record
        .get("labels")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| l.get("val").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    debug!(uri, instance, "attached quoted record");
    Some(QuotedPost {
        id: Network::Bluesky.global_id(uri),
        network: Network::Bluesky,
        native_id: uri.to_string(),
        author: author(&profile),
        created_at,
        text: from_byte_facets(&body.text, &byte_facets(&body.facets)),
        media,
        labels,
    })
}

/// Normalize a decoded post view.
///
/// The creation time is the record's own `createdAt`, clamped to the index
/// time so a future-dated record cannot pin itself to the top of a feed.
pub fn post_from_view(view: &PostView, instance: &str) -> Option<Post> {
    let record: PostRecord = decode(&view.record, "post record")?;

    let created_at = record
        .created_at
        .map(|c| c.min(view.indexed_at))
        .unwrap_or(view.indexed_at);

    let mut labels: Vec<String> = view.labels.iter().map(|l| l.val.clone()).collect();
    for label in record.labels.iter().flat_map(|l| &l.values) {
        if !labels.contains(&label.val) {
            labels.push(label.val.clone());
        }
    }
    let content_warning = labels
        .iter()
        .find(|l| WARNING_LABELS.contains(&l.as_str()))
        .cloned();

    let viewer = view.viewer.clone().unwrap_or_default();
    let rkey = |uri: &Option<String>| {
        uri.as_deref()
            .map(AtUri::extract_rkey)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    };

    Some(Post {
        id: Network::Bluesky.global_id(&view.uri),
        network: Network::Bluesky,
        instance: instance.to_string(),
        native_id: view.uri.clone(),
        native_cid: Some(view.cid.clone()),
        author: author(&view.author),
        created_at,
        text: from_byte_facets(&record.text, &byte_facets(&record.facets)),
        media: view.embed.as_ref().map(embed_media).unwrap_or_default(),
        quote: view
            .embed
            .as_ref()
            .and_then(quoted_record)
            .and_then(|r| quote(r, instance)),
        content_warning,
        labels,
        counts: Engagement {
            replies: view.reply_count,
            reposts: view.repost_count,
            likes: view.like_count,
        },
        reply_parent_id: record
            .reply
            .as_ref()
            .map(|r| Network::Bluesky.global_id(&r.parent.uri)),
        reposted_by: None,
        undo: UndoTokens {
            like: rkey(&viewer.like),
            repost: rkey(&viewer.repost),
        },
        viewer: ViewerState {
            liked: viewer.like.is_some(),
            reposted: viewer.repost.is_some(),
            bookmarked: viewer.bookmarked,
        },
    })
}

/// Normalize a raw post view.
pub fn post_from_value(value: &Value, instance: &str) -> Option<Post> {
    let view: PostView = decode(value, "post view")?;
    post_from_view(&view, instance)
}

/// Normalize one feed item and extract what the reply filter needs.
///
/// Reposts surface the original post with the reposter attached and take
/// the repost time as their feed time.
pub fn feed_item(value: &Value, instance: &str) -> Option<(Post, ReplyCandidate)> {
    let item: FeedViewPost = decode(value, "feed item")?;
    let mut post = post_from_view(&item.post, instance)?;

    let reason = item
        .reason
        .as_ref()
        .filter(|r| type_of(r) == Some(lex::REASON_REPOST))
        .and_then(|r| decode::<ReasonRepost>(r, "repost reason"));
    if let Some(reason) = reason {
        post.reposted_by = Some(author(&reason.by));
        post.created_at = reason.indexed_at;
    }

    let parent_author = item.reply.as_ref().and_then(|r| r.parent.get("author"));
    let candidate = ReplyCandidate {
        author_id: post
            .reposted_by
            .as_ref()
            .unwrap_or(&post.author)
            .id
            .clone(),
        is_repost: post.is_repost(),
        declares_reply: post.is_reply() || item.reply.is_some(),
        parent_author_id: parent_author
            .and_then(|a| a.get("did"))
            .and_then(Value::as_str)
            .map(str::to_string),
        parent_author_following: parent_author
            .and_then(|a| a.get("viewer"))
            .filter(|v| v.is_object())
            .map(|v| v.get("following").is_some_and(Value::is_string)),
    };

    Some((post, candidate))
}

/// Normalize a feed page without filtering, for author feeds.
pub fn feed_posts(values: &[Value], instance: &str) -> Vec<Post> {
    values
        .iter()
        .filter_map(|v| feed_item(v, instance))
        .map(|(post, _)| post)
        .collect()
}

pub fn profile(view: ProfileViewDetailed) -> UnifiedUser {
    let viewer = view.viewer.as_ref();
    UnifiedUser {
        id: Network::Bluesky.global_id(&view.did),
        network: Network::Bluesky,
        native_id: view.did,
        handle: view.handle,
        display_name: view.display_name.filter(|n| !n.is_empty()),
        avatar: view.avatar,
        banner: view.banner,
        bio: from_byte_facets(view.description.as_deref().unwrap_or_default(), &[]),
        followers_count: view.followers_count,
        following_count: view.follows_count,
        posts_count: view.posts_count,
        is_following: viewer.map(|v| v.following.is_some()),
        is_followed_by: viewer.map(|v| v.followed_by.is_some()),
        follow_token: viewer
            .and_then(|v| v.following.as_deref())
            .map(|uri| AtUri::extract_rkey(uri).to_string()),
    }
}

/// Descendants of a thread view as reply nodes keyed by URI.
///
/// Returns the root URI alongside the nodes. Each reply's parent is the
/// node it is nested under.
pub fn thread_replies(thread: &Value, instance: &str) -> Option<(String, Vec<ReplyNode>)> {
    let root_uri = thread.get("post")?.get("uri")?.as_str()?.to_string();

    let mut nodes = Vec::new();
    let mut stack: Vec<(&Value, &str)> = Vec::new();
    if let Some(replies) = thread.get("replies").and_then(Value::as_array) {
        stack.extend(replies.iter().rev().map(|r| (r, root_uri.as_str())));
    }

    while let Some((node, parent_uri)) = stack.pop() {
        if type_of(node).is_some_and(|t| t != lex::THREAD_VIEW_POST) {
            continue;
        }
        let Some(post) = node.get("post").and_then(|p| post_from_value(p, instance)) else {
            continue;
        };
        if let Some(replies) = node.get("replies").and_then(Value::as_array) {
            let uri = post_uri(node);
            stack.extend(replies.iter().rev().filter_map(|r| Some((r, uri?))));
        }
        nodes.push(ReplyNode {
            native_id: post.native_id.clone(),
            parent_native_id: Some(parent_uri.to_string()),
            post,
        });
    }

    Some((root_uri, nodes))
}

fn post_uri(node: &Value) -> Option<&str> {
    node.get("post")?.get("uri")?.as_str()
}

/// The parent chain of a thread view, immediate parent first.
pub fn ancestor_chain(thread: &Value, instance: &str) -> Vec<AncestorNode<Post>> {
    let mut chain = Vec::new();
    let mut next = thread.get("parent");

    while let Some(node) = next {
        if chain.len() >= MAX_ANCESTORS {
            break;
        }
        match type_of(node) {
            Some(lex::BLOCKED_POST) => {
                chain.push(AncestorNode::Blocked);
                break;
            }
            Some(lex::NOT_FOUND_POST) => {
                chain.push(AncestorNode::NotFound);
                break;
            }
            Some(lex::THREAD_VIEW_POST) | None => {
                match node.get("post").and_then(|p| post_from_value(p, instance)) {
                    Some(post) => chain.push(AncestorNode::Post(post)),
                    None => {
                        chain.push(AncestorNode::NotFound);
                        break;
                    }
                }
                next = node.get("parent");
            }
            Some(other) => {
                debug!(kind = other, "unknown thread node, ending ancestor walk");
                break;
            }
        }
    }

    chain
}

/// The first post permalink linked from the post text.
pub fn quote_permalink(post: &Post) -> Option<Permalink> {
    post.text.spans.iter().find_map(|span| match &span.kind {
        SpanKind::Link { url } => Permalink::parse(url),
        _ => None,
    })
}
