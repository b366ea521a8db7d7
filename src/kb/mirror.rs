//! Active posts held in memory alongside the index

use std::collections::HashMap;

use super::post::Post;

/// In-memory copy of the active posts, keyed by id
#[derive(Debug, Clone, Default)]
pub struct PostMirror {
    posts: HashMap<String, Post>,
}

impl PostMirror {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mirror from store rows, dropping inactive posts
    #[inline]
    pub fn from_posts(posts: impl IntoIterator<Item = Post>) -> Self {
        let mut mirror = Self::new();
        for post in posts {
            if post.active {
                mirror.upsert(post);
            }
        }
        mirror
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    #[inline]
    pub fn get(&self, id: &str) -> Option<&Post> {
        self.posts.get(id)
    }

    /// Look up a post that may be shown to a caller
    #[inline]
    pub fn resolve_active(&self, id: &str) -> Option<&Post> {
        self.posts.get(id).filter(|post| post.active)
    }

    #[inline]
    pub fn upsert(&mut self, post: Post) -> Option<Post> {
        self.posts.insert(post.id.clone(), post)
    }

    #[inline]
    pub fn remove(&mut self, id: &str) -> Option<Post> {
        self.posts.remove(id)
    }

    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.posts.keys().map(String::as_str)
    }

    #[inline]
    pub fn posts(&self) -> impl Iterator<Item = &Post> {
        self.posts.values()
    }
}
