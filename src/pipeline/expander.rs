//! Job expansion into per-(zip, page) query rows.

use crate::db::models::NewQuery;

/// Expand a job into its full set of query rows.
///
/// Emits one row per (zip, page) in (zip, page) lexicographic order; the
/// claim protocol selects the lowest rows first, so this ordering is
/// observable. Pure function; the caller persists the result.
pub fn expand_job(keyword: &str, pages: i32, zips: &[String]) -> Vec<NewQuery> {
    let mut queries = Vec::with_capacity(zips.len() * pages.max(0) as usize);
    for zip in zips {
        for page in 1..=pages {
            queries.push(NewQuery {
                zip: zip.clone(),
                page,
                q: format!("{zip} {keyword}"),
            });
        }
    }
    queries
}
