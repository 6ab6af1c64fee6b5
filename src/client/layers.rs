//! Per-resource views over the [`ApiClient`].
//!
//! Resources are handed out as raw `serde_json::Value`s; interpreting the LMS schema is up to
//! the consumer. Every layer reads through its own [`LayerCache`](super::LayerCache), keyed per
//! signed-in user.
use http::Method;
use serde_json::{json, Value};

use super::ApiClient;
use crate::batch::PendingReply;
use crate::errors::ClientError;

/// Courses the current user is enrolled in.
#[derive(Clone)]
pub struct Courses {
    client: ApiClient,
}

impl Courses {
    pub(super) fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Memberships of the current user, with the course expanded.
    pub async fn all(&self) -> Result<Value, ClientError> {
        let user_id = self.client.user_id()?;
        let key = self.client.user_key("all")?;
        let path = format!("users/{user_id}/memberships?expand=course&limit=1000");
        self.client
            .inner
            .caches
            .courses
            .get_or_fetch(&key, || self.client.get(&path))
            .await
    }

    pub async fn get(&self, course_id: &str) -> Result<Value, ClientError> {
        let key = self.client.user_key(course_id)?;
        let path = format!("courses/{course_id}");
        self.client
            .inner
            .caches
            .courses
            .get_or_fetch(&key, || self.client.get(&path))
            .await
    }

    pub fn invalidate(&self) {
        self.client.inner.caches.courses.invalidate();
    }
}

/// Grades of the current user.
#[derive(Clone)]
pub struct Grades {
    client: ApiClient,
}

impl Grades {
    pub(super) fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn path(course_id: &str, user_id: &str) -> String {
        format!("courses/{course_id}/gradebook/users/{user_id}")
    }

    pub async fn for_course(&self, course_id: &str) -> Result<Value, ClientError> {
        let key = self.client.user_key(course_id)?;
        let path = Self::path(course_id, &self.client.user_id()?);
        self.client
            .inner
            .caches
            .grades
            .get_or_fetch(&key, || self.client.get(&path))
            .await
    }

    /// Grades for several courses. Cache misses go out as one batch request; each course
    /// gets its own result, so one failing course does not hide the others.
    pub async fn for_courses(&self, course_ids: &[String]) -> Result<Vec<Result<Value, ClientError>>, ClientError> {
        let user_id = self.client.user_id()?;
        let cache = &self.client.inner.caches.grades;

        let keys = course_ids
            .iter()
            .map(|id| self.client.user_key(id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut slots: Vec<Option<Result<Value, ClientError>>> =
            keys.iter().map(|key| cache.get(key).map(Ok)).collect();
        let misses: Vec<usize> = (0..course_ids.len()).filter(|&i| slots[i].is_none()).collect();

        if !misses.is_empty() {
            if !self.client.open_batch() {
                return Err(ClientError::Batch("a batch is already open".to_string()));
            }

            let mut replies: Vec<(usize, PendingReply)> = Vec::with_capacity(misses.len());
            for i in misses {
                let path = Self::path(&course_ids[i], &user_id);
                replies.push((i, self.client.batcher().enqueue(Method::GET, &path)?));
            }

            self.client.send_batch().await?;

            for (i, reply) in replies {
                let result = reply.await;
                if let Ok(value) = &result {
                    cache.insert(keys[i].clone(), value.clone());
                }
                slots[i] = Some(result);
            }
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(ClientError::Batch("entry was not sent".to_string()))))
            .collect())
    }

    pub fn invalidate(&self) {
        self.client.inner.caches.grades.invalidate();
    }
}

/// The activity stream (announcements, due dates, new grades).
#[derive(Clone)]
pub struct Stream {
    client: ApiClient,
}

impl Stream {
    pub(super) fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn entries(&self) -> Result<Value, ClientError> {
        let key = self.client.user_key("entries")?;
        self.client
            .inner
            .caches
            .stream
            .get_or_fetch(&key, || {
                self.client.request(
                    Method::POST,
                    "streams/ultra",
                    Some(json!({"providers": {}, "forOverview": false, "retrieveOnly": true})),
                )
            })
            .await
    }

    pub fn invalidate(&self) {
        self.client.inner.caches.stream.invalidate();
    }
}

#[derive(Clone)]
pub struct Users {
    client: ApiClient,
}

impl Users {
    pub(super) fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn me(&self) -> Result<Value, ClientError> {
        let key = self.client.user_key("me")?;
        self.client
            .inner
            .caches
            .users
            .get_or_fetch(&key, || self.client.get("users/me"))
            .await
    }

    pub async fn get(&self, user_id: &str) -> Result<Value, ClientError> {
        let key = self.client.user_key(user_id)?;
        let path = format!("users/{user_id}");
        self.client
            .inner
            .caches
            .users
            .get_or_fetch(&key, || self.client.get(&path))
            .await
    }

    pub fn invalidate(&self) {
        self.client.inner.caches.users.invalidate();
    }
}
