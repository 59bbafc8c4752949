//! REST client for the course service: course listing, rosters and the
//! attendance report export.

use chrono::NaiveDate;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use rollcall_core::{CourseId, RosterEntry, StudentId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("course {0} not found")]
    NotFound(CourseId),
    #[error("request rejected ({status}): {body}")]
    Status { status: StatusCode, body: String },
}

pub type ApiResult<T> = Result<T, ApiError>;

/// One course as listed for the signed-in teacher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub id: CourseId,
    pub name: String,
    #[serde(default)]
    pub course_code: String,
    #[serde(default)]
    pub student_count: usize,
}

/// Downloaded attendance report.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Page { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Page { results } => results,
            Listing::Plain(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CourseDetail {
    #[serde(default)]
    students: Vec<StudentRecord>,
}

#[derive(Debug, Deserialize)]
struct StudentRecord {
    id: StudentId,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    profile_photo: Option<String>,
}

impl From<StudentRecord> for RosterEntry {
    fn from(s: StudentRecord) -> Self {
        // Same "first last" form the recognition server puts in face names.
        let display_name = format!("{} {}", s.first_name, s.last_name).trim().to_string();
        RosterEntry {
            student_id: s.id,
            display_name,
            last_known_photo_ref: s.profile_photo.filter(|p| !p.is_empty()),
        }
    }
}

/// Client for the course REST API, authenticated with a bearer token.
pub struct RosterClient {
    http: Client,
    base_url: String,
    token: String,
}

impl RosterClient {
    pub fn new(api_url: &str, token: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: api_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Courses visible to the token's owner.
    pub async fn list_courses(&self) -> ApiResult<Vec<CourseSummary>> {
        let url = format!("{}/courses/", self.base_url);
        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let response = check(response, None).await?;
        let listing: Listing<CourseSummary> = response.json().await?;
        Ok(listing.into_vec())
    }

    /// Enrolled students of a course.
    pub async fn roster(&self, course_id: CourseId) -> ApiResult<Vec<RosterEntry>> {
        let url = format!("{}/courses/{course_id}/", self.base_url);
        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let response = check(response, Some(course_id)).await?;
        let detail: CourseDetail = response.json().await?;
        let roster: Vec<RosterEntry> = detail.students.into_iter().map(RosterEntry::from).collect();
        tracing::debug!(course = %course_id, students = roster.len(), "roster fetched");
        Ok(roster)
    }

    /// Download the attendance report for one day.
    pub async fn export_attendance(&self, course_id: CourseId, date: NaiveDate) -> ApiResult<ExportArtifact> {
        let url = format!("{}/courses/{course_id}/attendance-report/", self.base_url);
        let day = date.format("%Y-%m-%d").to_string();
        let response = self
            .http
            .get(&url)
            .query(&[("date", day.as_str())])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = check(response, Some(course_id)).await?;

        let headers = response.headers();
        let file_name = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_file_name)
            .unwrap_or_else(|| default_report_name(course_id, date));
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();

        tracing::info!(course = %course_id, file = %file_name, bytes = bytes.len(), "attendance report downloaded");
        Ok(ExportArtifact {
            file_name,
            content_type,
            bytes,
        })
    }
}

async fn check(response: reqwest::Response, course_id: Option<CourseId>) -> ApiResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let (StatusCode::NOT_FOUND, Some(course_id)) = (status, course_id) {
        return Err(ApiError::NotFound(course_id));
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

fn default_report_name(course_id: CourseId, date: NaiveDate) -> String {
    format!("attendance_{course_id}_{}.xlsx", date.format("%Y-%m-%d"))
}

/// File name from a `Content-Disposition` header value.
fn disposition_file_name(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|part| {
        let value = part.strip_prefix("filename=")?;
        let name = value.trim_matches('"').trim();
        // Never let a server-chosen name escape the output directory.
        let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        (!name.is_empty()).then(|| name.to_string())
    })
}
