//! Room management.

use crate::error::Result;
use chrono::{DateTime, Utc};
use core_client::{ApiClient, Method, RequestOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

const BASE_PATH: &str = "/rooms";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|capacity| self.participants.len() >= capacity as usize)
    }
}

/// Body of `POST /rooms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRoom {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
}

impl CreateRoom {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            capacity: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

#[derive(Clone)]
pub struct RoomsService {
    client: ApiClient,
}

impl RoomsService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn room_path(room_id: &str) -> String {
        format!("{}/{}", BASE_PATH, room_id)
    }

    /// Lists rooms, one page at a time when `page` is given.
    pub async fn list(&self, page: Option<u32>) -> Result<Vec<Room>> {
        let options = RequestOptions::new().param("page", page);
        Ok(self.client.get(BASE_PATH, options).await?.data)
    }

    pub async fn get(&self, room_id: &str) -> Result<Room> {
        Ok(self
            .client
            .get(&Self::room_path(room_id), RequestOptions::new())
            .await?
            .data)
    }

    pub async fn create(&self, room: &CreateRoom) -> Result<Room> {
        let created: Room = self
            .client
            .post(BASE_PATH, room, RequestOptions::new())
            .await?
            .data;
        info!(room_id = %created.id, "Room created");
        Ok(created)
    }

    /// Joins a room and returns its updated state.
    pub async fn join(&self, room_id: &str) -> Result<Room> {
        let path = format!("{}/join", Self::room_path(room_id));
        Ok(self.client.post(&path, &json!({}), RequestOptions::new()).await?.data)
    }

    pub async fn leave(&self, room_id: &str) -> Result<()> {
        let path = format!("{}/leave", Self::room_path(room_id));
        self.client
            .request_raw(
                Method::Post,
                &path,
                RequestOptions::new().json(json!({})),
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, room_id: &str) -> Result<()> {
        self.client
            .request_raw(
                Method::Delete,
                &Self::room_path(room_id),
                RequestOptions::new(),
            )
            .await?;
        info!(room_id, "Room deleted");
        Ok(())
    }
}
