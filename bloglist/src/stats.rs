// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of bloglist.
//
// bloglist is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// bloglist is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with bloglist.  If not,
// see <http://www.gnu.org/licenses/>.

//! # stats
//!
//! Summary statistics over a collection of [Blog]s.
//!
//! Every function here is pure: it borrows its input, never mutates it, and will return the same
//! answer on the same input. Several of them are order-sensitive when it comes to ties, so callers
//! should hand them blogs in the order in which they were created (which is what the storage
//! layer returns from [all_blogs]).
//!
//! [all_blogs]: crate::storage::Backend::all_blogs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

use crate::entities::Blog;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("No blogs were supplied; there is no favorite"))]
    NoBlogs { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          total likes                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Sum the likes across all `blogs`; zero for an empty slice
///
/// Saturates at `u64::MAX` rather than overflowing.
pub fn total_likes(blogs: &[Blog]) -> u64 {
    blogs.iter().map(Blog::likes).fold(0, u64::saturating_add)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            favorite                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Find the most-liked blog
///
/// On ties, the first maximal element (in slice order) wins. There is no sensible answer for an
/// empty slice, so that case fails with [Error::NoBlogs]; callers that can receive an empty
/// collection should check first.
pub fn favorite(blogs: &[Blog]) -> Result<&Blog> {
    // `Iterator::max_by_key` returns the *last* maximal element, so fold by hand.
    blogs
        .iter()
        .fold(None, |best: Option<&Blog>, blog| match best {
            Some(best) if best.likes() >= blog.likes() => Some(best),
            _ => Some(blog),
        })
        .context(NoBlogsSnafu)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           most blogs                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The author with the most blogs & their count
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AuthorBlogs {
    pub author: String,
    pub count: usize,
}

/// Total up `f` per author, then return the author with the greatest total
///
/// Authors are ranked in order of first appearance in `blogs`, and only a strictly greater total
/// displaces the leader; so on a tie the author seen earliest wins, no matter who got there first.
/// Totals saturate at `u64::MAX`.
fn top_author<'a, F>(blogs: &'a [Blog], f: F) -> Option<(&'a str, u64)>
where
    F: Fn(&Blog) -> u64,
{
    let mut slots: HashMap<&'a str, usize> = HashMap::new();
    let mut totals: Vec<(&'a str, u64)> = Vec::new();
    for blog in blogs {
        let slot = *slots.entry(blog.author()).or_insert_with(|| {
            totals.push((blog.author(), 0));
            totals.len() - 1
        });
        totals[slot].1 = totals[slot].1.saturating_add(f(blog));
    }
    totals
        .into_iter()
        .fold(None, |best, (author, total)| match best {
            Some((_, most)) if most >= total => best,
            _ => Some((author, total)),
        })
}

/// Find the author with the most blogs; `None` on an empty slice
pub fn most_blogs(blogs: &[Blog]) -> Option<AuthorBlogs> {
    top_author(blogs, |_| 1).map(|(author, count)| AuthorBlogs {
        author: author.to_owned(),
        count: count as usize,
    })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           most likes                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The author with the most likes & their total
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AuthorLikes {
    pub author: String,
    pub likes: u64,
}

/// Find the author whose blogs have the most likes, summed; `None` on an empty slice
///
/// An author whose blogs have no likes at all can still win (if nobody has any likes, the first
/// author wins with a total of zero).
pub fn most_likes(blogs: &[Blog]) -> Option<AuthorLikes> {
    top_author(blogs, Blog::likes).map(|(author, likes)| AuthorLikes {
        author: author.to_owned(),
        likes,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::entities::UserId;

    fn blog(title: &str, author: &str, likes: u64) -> Blog {
        Blog::new(
            title,
            author,
            &format!("https://example.com/{}", title),
            likes,
            &UserId::default(),
        )
    }

    fn corpus() -> Vec<Blog> {
        vec![
            blog("React patterns", "Michael Chan", 7),
            blog("Go To Statement Considered Harmful", "Edsger W. Dijkstra", 5),
            blog("Canonical string reduction", "Edsger W. Dijkstra", 12),
            blog("First class tests", "Robert C. Martin", 10),
            blog("TDD harms architecture", "Robert C. Martin", 0),
            blog("Type wars", "Robert C. Martin", 2),
        ]
    }

    #[test]
    fn totals() {
        assert_eq!(0, total_likes(&[]));
        assert_eq!(8, total_likes(&[blog("a", "X", 5), blog("b", "Y", 3)]));
        assert_eq!(36, total_likes(&corpus()));
    }

    #[test]
    fn favorites() {
        assert!(matches!(favorite(&[]), Err(Error::NoBlogs { .. })));

        let blogs = vec![blog("A", "X", 5), blog("B", "Y", 9)];
        let fav = favorite(&blogs).unwrap(/* known good */);
        assert_eq!("B", fav.title());
        assert_eq!(9, fav.likes());

        let blogs = corpus();
        assert_eq!(
            "Canonical string reduction",
            favorite(&blogs).unwrap(/* known good */).title()
        );

        // First maximal element wins
        let blogs = vec![blog("A", "X", 3), blog("B", "Y", 9), blog("C", "Z", 9)];
        assert_eq!("B", favorite(&blogs).unwrap(/* known good */).title());
        let blogs = vec![blog("A", "X", 0), blog("B", "Y", 0)];
        assert_eq!("A", favorite(&blogs).unwrap(/* known good */).title());
    }

    #[test]
    fn most_blogs_smoke() {
        assert_eq!(None, most_blogs(&[]));
        assert_eq!(
            Some(AuthorBlogs {
                author: "A".to_owned(),
                count: 2
            }),
            most_blogs(&[blog("a", "A", 0), blog("b", "B", 0), blog("c", "A", 0)])
        );
        assert_eq!(
            Some(AuthorBlogs {
                author: "Robert C. Martin".to_owned(),
                count: 3
            }),
            most_blogs(&corpus())
        );
        assert_eq!(
            Some(AuthorBlogs {
                author: "Solo".to_owned(),
                count: 1
            }),
            most_blogs(&[blog("a", "Solo", 4)])
        );
    }

    #[test]
    fn most_blogs_ties() {
        // A reaches two before B does, but B was seen first
        let blogs = vec![
            blog("1", "B", 0),
            blog("2", "A", 0),
            blog("3", "A", 0),
            blog("4", "B", 0),
        ];
        assert_eq!(
            Some(AuthorBlogs {
                author: "B".to_owned(),
                count: 2
            }),
            most_blogs(&blogs)
        );
        // All equal: first author seen wins
        let blogs = vec![blog("1", "C", 0), blog("2", "B", 0), blog("3", "A", 0)];
        assert_eq!("C", most_blogs(&blogs).unwrap(/* known good */).author);
    }

    #[test]
    fn most_likes_smoke() {
        assert_eq!(None, most_likes(&[]));
        assert_eq!(
            Some(AuthorLikes {
                author: "A".to_owned(),
                likes: 11
            }),
            most_likes(&[blog("a", "A", 3), blog("b", "B", 10), blog("c", "A", 8)])
        );
        assert_eq!(
            Some(AuthorLikes {
                author: "Edsger W. Dijkstra".to_owned(),
                likes: 17
            }),
            most_likes(&corpus())
        );
        // No likes anywhere: the first author still wins
        assert_eq!(
            Some(AuthorLikes {
                author: "X".to_owned(),
                likes: 0
            }),
            most_likes(&[blog("a", "X", 0), blog("b", "Y", 0)])
        );
    }

    #[test]
    fn most_likes_ties() {
        // Y reaches 10 first, but X was seen first
        let blogs = vec![blog("a", "X", 4), blog("b", "Y", 10), blog("c", "X", 6)];
        assert_eq!(
            Some(AuthorLikes {
                author: "X".to_owned(),
                likes: 10
            }),
            most_likes(&blogs)
        );
        // A strictly greater total still wins from behind
        let blogs = vec![blog("a", "X", 4), blog("b", "Y", 10), blog("c", "X", 7)];
        assert_eq!("X", most_likes(&blogs).unwrap(/* known good */).author);
        let blogs = vec![blog("a", "X", 4), blog("b", "Y", 10), blog("c", "X", 5)];
        assert_eq!("Y", most_likes(&blogs).unwrap(/* known good */).author);
    }

    #[test]
    fn huge_like_counts() {
        let blogs = vec![blog("a", "X", u64::MAX), blog("b", "Y", 1), blog("c", "X", 1)];
        assert_eq!(u64::MAX, total_likes(&blogs));
        assert_eq!(
            Some(AuthorLikes {
                author: "X".to_owned(),
                likes: u64::MAX
            }),
            most_likes(&blogs)
        );
    }

    #[test]
    fn purity() {
        let blogs = corpus();
        let before = blogs.clone();
        assert_eq!(total_likes(&blogs), total_likes(&blogs));
        assert_eq!(
            favorite(&blogs).unwrap(/* known good */),
            favorite(&blogs).unwrap(/* known good */)
        );
        assert_eq!(most_blogs(&blogs), most_blogs(&blogs));
        assert_eq!(most_likes(&blogs), most_likes(&blogs));
        assert_eq!(before, blogs);
    }
}
