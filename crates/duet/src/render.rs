//! Plain-text rendering of normalized posts for the terminal.

use std::fmt::Write;

use duet_core::{Post, SpanKind, ThreadItem, UnifiedUser};

pub fn count(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// One post as a header line, its text and an engagement line.
pub fn post(post: &Post, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    let mut out = String::new();

    let _ = write!(
        out,
        "{pad}{} @{} · {}",
        post.id,
        post.author.handle,
        post.created_at.format("%Y-%m-%d %H:%M")
    );
    if let Some(booster) = &post.reposted_by {
        let _ = write!(out, " (reposted by @{})", booster.handle);
    }
    out.push('\n');

    match &post.content_warning {
        Some(cw) => {
            let _ = writeln!(out, "{pad}  [CW: {cw}]");
        }
        None => {
            for line in post.text.text.lines() {
                let _ = writeln!(out, "{pad}  {line}");
            }
        }
    }

    for span in &post.text.spans {
        if let SpanKind::Link { url } = &span.kind {
            let _ = writeln!(out, "{pad}  <{url}>");
        }
    }
    for media in &post.media {
        let _ = writeln!(
            out,
            "{pad}  [{:?}] {}",
            media.kind,
            media.alt.as_deref().unwrap_or(&media.url)
        );
    }
    if let Some(quote) = &post.quote {
        let _ = writeln!(
            out,
            "{pad}  > @{}: {}",
            quote.author.handle,
            quote.text.text.replace('\n', " ")
        );
    }

    let mark = |on: bool| if on { "*" } else { "" };
    let _ = writeln!(
        out,
        "{pad}  replies {} · reposts {}{} · likes {}{}",
        count(post.counts.replies),
        count(post.counts.reposts),
        mark(post.viewer.reposted),
        count(post.counts.likes),
        mark(post.viewer.liked),
    );
    out
}

/// Ancestors, the focused post and its depth-indented replies.
pub fn thread(ancestors: &[Post], focus: &Post, replies: &[ThreadItem]) -> String {
    let mut out = String::new();
    for ancestor in ancestors {
        out.push_str(&post(ancestor, 0));
    }
    out.push_str(&post(focus, 0));
    for item in replies {
        out.push_str(&post(&item.post, item.depth as usize));
    }
    out
}

pub fn profile(user: &UnifiedUser) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} (@{})",
        user.display_name.as_deref().unwrap_or(&user.handle),
        user.handle
    );
    let _ = writeln!(out, "{}", user.id);
    if !user.bio.text.is_empty() {
        let _ = writeln!(out, "{}", user.bio.text);
    }
    let _ = writeln!(
        out,
        "posts {} · following {} · followers {}",
        count(user.posts_count),
        count(user.following_count),
        count(user.followers_count)
    );
    if let Some(following) = user.is_following {
        let _ = writeln!(
            out,
            "you {} them{}",
            if following { "follow" } else { "do not follow" },
            if user.is_followed_by == Some(true) {
                " · follows you"
            } else {
                ""
            }
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use duet_core::{Author, Engagement, Network, StyledText, UndoTokens, ViewerState};

    fn sample() -> Post {
        Post {
            id: "mastodon:1".to_string(),
            network: Network::Mastodon,
            instance: "social.example".to_string(),
            native_id: "1".to_string(),
            native_cid: None,
            author: Author {
                id: "9".to_string(),
                handle: "alice@social.example".to_string(),
                display_name: None,
                avatar: None,
            },
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            text: StyledText::plain("hello\nworld"),
            media: Vec::new(),
            quote: None,
            content_warning: None,
            labels: Vec::new(),
            counts: Engagement {
                replies: Some(0),
                reposts: None,
                likes: Some(3),
            },
            reply_parent_id: None,
            reposted_by: None,
            undo: UndoTokens::default(),
            viewer: ViewerState {
                liked: true,
                ..ViewerState::default()
            },
        }
    }

    #[test]
    fn test_absent_counts_are_not_zero() {
        let rendered = post(&sample(), 0);
        assert!(rendered.contains("replies 0 · reposts - · likes 3*"));
    }

    #[test]
    fn test_content_warning_hides_text() {
        let mut p = sample();
        p.content_warning = Some("spoilers".to_string());
        let rendered = post(&p, 1);
        assert!(rendered.contains("  [CW: spoilers]"));
        assert!(!rendered.contains("hello"));
    }

    #[test]
    fn test_thread_indents_by_depth() {
        let focus = sample();
        let mut reply = sample();
        reply.id = "mastodon:2".to_string();
        let items = vec![ThreadItem {
            id: reply.id.clone(),
            post: reply,
            depth: 2,
        }];

        let rendered = thread(&[], &focus, &items);
        assert!(rendered.contains("\n    mastodon:2 @alice@social.example"));
    }
}
