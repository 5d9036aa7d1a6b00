use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::cache::{ChildEntity, Entity, EntityId, SortOrder};
use crate::error::SdkError;

/// Payment provider environment
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Environment {
    Production,
    Stage,
    Local,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => write!(f, "Production"),
            Environment::Stage => write!(f, "Stage"),
            Environment::Local => write!(f, "Local"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "stage" | "staging" => Ok(Environment::Stage),
            "local" | "dev" => Ok(Environment::Local),
            other => Err(SdkError::GenericError(format!(
                "Invalid environment: {other}"
            ))),
        }
    }
}

/// Settings for the external payment provider
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL every endpoint path is appended to
    pub base_url: String,
    /// Client identifier for the client-credentials grant
    pub client_id: String,
    /// Client secret for the client-credentials grant
    pub client_secret: String,
    /// Amount charged when the caller does not give one
    pub amount: Decimal,
    pub currency: String,
    /// Description used when the caller does not give one
    pub description: String,
    pub token_path: String,
    pub payments_path: String,
}

impl fmt::Display for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the secret.
        write!(
            f,
            "{} (client {}, {} {})",
            self.base_url, self.client_id, self.amount, self.currency
        )
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("amount", &self.amount)
            .field("currency", &self.currency)
            .field("description", &self.description)
            .field("token_path", &self.token_path)
            .field("payments_path", &self.payments_path)
            .finish()
    }
}

/// Configuration for the SDK
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub environment: Environment,
    pub provider: ProviderConfig,
    /// Directory for storing data files (e.g., SQLite database)
    pub data_dir: String,
}

impl Config {
    /// Creates a default configuration for the specified environment
    ///
    /// # Arguments
    ///
    /// * `environment` - The payment provider environment
    /// * `data_dir` - Directory for storing data files
    /// * `client_id` - Client identifier issued by the provider
    /// * `client_secret` - Client secret issued by the provider
    pub fn default_config(
        environment: Environment,
        data_dir: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        let base_url = match environment {
            Environment::Production => "https://fib.iq",
            Environment::Stage => "https://fib.stage.fib.iq",
            Environment::Local => "http://localhost:8080",
        };

        Self {
            environment,
            provider: ProviderConfig {
                base_url: base_url.to_string(),
                client_id,
                client_secret,
                amount: Decimal::ONE,
                currency: "IQD".to_string(),
                description: "Student Registration Fee".to_string(),
                token_path: "/auth/realms/fib-online-shop/protocol/openid-connect/token"
                    .to_string(),
                payments_path: "/protected/v1/payments".to_string(),
            },
            data_dir,
        }
    }
}

/// Controls how long `wait_for_payment` keeps polling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    /// Delay between two status checks
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_millis(5000),
        }
    }
}

/// Status of a payment as reported by the provider
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Created,
    Pending,
    Paid,
    Failed,
    Cancelled,
    Expired,
    /// Any status string the provider sends that is not listed above
    Other(String),
}

impl PaymentStatus {
    /// Maps a provider status string, treating `SUCCESS` as paid
    pub fn from_provider(status: &str) -> Self {
        match status {
            "CREATED" => PaymentStatus::Created,
            "PENDING" | "UNPAID" => PaymentStatus::Pending,
            "PAID" | "SUCCESS" => PaymentStatus::Paid,
            "FAILED" => PaymentStatus::Failed,
            "CANCELLED" => PaymentStatus::Cancelled,
            "EXPIRED" => PaymentStatus::Expired,
            other => PaymentStatus::Other(other.to_string()),
        }
    }

    /// Terminal states that mean the money will never arrive
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Expired
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == PaymentStatus::Paid || self.is_failure()
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Created => write!(f, "CREATED"),
            PaymentStatus::Pending => write!(f, "PENDING"),
            PaymentStatus::Paid => write!(f, "PAID"),
            PaymentStatus::Failed => write!(f, "FAILED"),
            PaymentStatus::Cancelled => write!(f, "CANCELLED"),
            PaymentStatus::Expired => write!(f, "EXPIRED"),
            PaymentStatus::Other(status) => write!(f, "{status}"),
        }
    }
}

/// Deep links into the provider's mobile apps
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppLinks {
    pub personal: String,
    pub business: String,
    pub corporate: String,
}

/// A payment request created with the provider
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentSession {
    pub payment_id: String,
    pub status: PaymentStatus,
    /// Short code the payer can type into the app
    pub readable_code: String,
    pub app_links: AppLinks,
    /// Base64 data URL of the QR image
    pub qr_code: String,
    pub valid_until: String,
}

/// Request for creating a payment
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    /// Falls back to the configured amount
    pub amount: Option<Decimal>,
    /// Falls back to the configured description
    pub description: Option<String>,
}

/// Result of a single status check
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentStatusCheck {
    /// Raw status string from the provider
    pub status: String,
    pub paid: bool,
}

impl PaymentStatusCheck {
    pub fn new(status: String) -> Self {
        let paid = PaymentStatus::from_provider(&status) == PaymentStatus::Paid;
        Self { status, paid }
    }

    pub fn state(&self) -> PaymentStatus {
        PaymentStatus::from_provider(&self.status)
    }
}

/// Final result of `wait_for_payment`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub success: bool,
    pub status: PaymentStatusCheck,
    /// Raw terminal status when the payment did not go through
    pub reason: Option<String>,
}

// Student records

/// A registered student
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub stage_id: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub stage_id: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
}

impl NewStudent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Fields to change on a student, `None` leaves a field as is
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Entity for Student {
    type Draft = NewStudent;
    type Patch = StudentPatch;

    const COLLECTION: &'static str = "students";
    const SORT: SortOrder = SortOrder::ascending("name");

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_draft(id: EntityId, draft: &NewStudent, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.clone(),
            email: draft.email.clone(),
            phone: draft.phone.clone(),
            stage_id: draft.stage_id.clone(),
            date_of_birth: draft.date_of_birth,
            address: draft.address.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &StudentPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(email) = &patch.email {
            self.email = Some(email.clone());
        }
        if let Some(phone) = &patch.phone {
            self.phone = Some(phone.clone());
        }
        if let Some(stage_id) = &patch.stage_id {
            self.stage_id = Some(stage_id.clone());
        }
        if let Some(date_of_birth) = patch.date_of_birth {
            self.date_of_birth = Some(date_of_birth);
        }
        if let Some(address) = &patch.address {
            self.address = Some(address.clone());
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// An academic cohort, ordered by level
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: EntityId,
    pub name: String,
    pub level: u32,
    pub academic_year: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewStage {
    pub name: String,
    pub level: u32,
    pub academic_year: String,
}

impl NewStage {
    /// Level 1 in the current calendar year
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: 1,
            academic_year: Utc::now().year().to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
}

impl Entity for Stage {
    type Draft = NewStage;
    type Patch = StagePatch;

    const COLLECTION: &'static str = "stages";
    const SORT: SortOrder = SortOrder::ascending("level");

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_draft(id: EntityId, draft: &NewStage, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.clone(),
            level: draft.level,
            academic_year: draft.academic_year.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &StagePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(level) = patch.level {
            self.level = level;
        }
        if let Some(academic_year) = &patch.academic_year {
            self.academic_year = academic_year.clone();
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub code: String,
    pub credits: u32,
    #[serde(default)]
    pub stage_id: Option<String>,
    #[serde(default)]
    pub instructor_name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewCourse {
    pub name: String,
    pub code: String,
    pub credits: u32,
    pub stage_id: Option<String>,
    pub instructor_name: String,
    pub description: String,
}

impl NewCourse {
    /// A three-credit course with no code or instructor
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: String::new(),
            credits: 3,
            stage_id: None,
            instructor_name: String::new(),
            description: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoursePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Entity for Course {
    type Draft = NewCourse;
    type Patch = CoursePatch;

    const COLLECTION: &'static str = "courses";
    const SORT: SortOrder = SortOrder::ascending("name");

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_draft(id: EntityId, draft: &NewCourse, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.clone(),
            code: draft.code.clone(),
            credits: draft.credits,
            stage_id: draft.stage_id.clone(),
            instructor_name: draft.instructor_name.clone(),
            description: draft.description.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &CoursePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(code) = &patch.code {
            self.code = code.clone();
        }
        if let Some(credits) = patch.credits {
            self.credits = credits;
        }
        if let Some(stage_id) = &patch.stage_id {
            self.stage_id = Some(stage_id.clone());
        }
        if let Some(instructor_name) = &patch.instructor_name {
            self.instructor_name = instructor_name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// A student's enrollment in a course, stored under the student
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: EntityId,
    pub course_id: String,
    /// Copied at enrollment time so the enrollment still reads well if the course goes away
    pub course_name: String,
    pub enrolled_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewEnrollment {
    pub course_id: String,
    pub course_name: String,
    pub enrolled_date: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_name: Option<String>,
}

impl Entity for Enrollment {
    type Draft = NewEnrollment;
    type Patch = EnrollmentPatch;

    const COLLECTION: &'static str = "enrollments";
    const SORT: SortOrder = SortOrder::descending("enrolledDate");

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_draft(id: EntityId, draft: &NewEnrollment, now: DateTime<Utc>) -> Self {
        Self {
            id,
            course_id: draft.course_id.clone(),
            course_name: draft.course_name.clone(),
            enrolled_date: draft.enrolled_date,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &EnrollmentPatch) {
        if let Some(course_name) = &patch.course_name {
            self.course_name = course_name.clone();
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl ChildEntity for Enrollment {
    /// Student id
    type ParentKey = String;
}

/// Identifies the enrollment that owns a set of marks or attendance records
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrollmentKey {
    pub student_id: String,
    pub enrollment_id: String,
}

impl EnrollmentKey {
    pub fn new(student_id: impl Into<String>, enrollment_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            enrollment_id: enrollment_id.into(),
        }
    }
}

impl fmt::Display for EnrollmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.student_id, self.enrollment_id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    pub id: EntityId,
    /// Name of the exam, quiz or assignment
    pub assessment: String,
    pub score: f64,
    pub max_score: f64,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewMark {
    pub assessment: String,
    pub score: f64,
    pub max_score: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
}

impl Entity for Mark {
    type Draft = NewMark;
    type Patch = MarkPatch;

    const COLLECTION: &'static str = "marks";
    const SORT: SortOrder = SortOrder::descending("recordedAt");

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_draft(id: EntityId, draft: &NewMark, now: DateTime<Utc>) -> Self {
        Self {
            id,
            assessment: draft.assessment.clone(),
            score: draft.score,
            max_score: draft.max_score,
            recorded_at: draft.recorded_at,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &MarkPatch) {
        if let Some(assessment) = &patch.assessment {
            self.assessment = assessment.clone();
        }
        if let Some(score) = patch.score {
            self.score = score;
        }
        if let Some(max_score) = patch.max_score {
            self.max_score = max_score;
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl ChildEntity for Mark {
    type ParentKey = EnrollmentKey;
}

/// Count and mean score of the marks recorded for one enrollment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarkSummary {
    pub count: usize,
    pub average: Option<f64>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceStatus::Present => write!(f, "present"),
            AttendanceStatus::Absent => write!(f, "absent"),
            AttendanceStatus::Late => write!(f, "late"),
            AttendanceStatus::Excused => write!(f, "excused"),
        }
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(SdkError::GenericError(format!(
                "Invalid attendance status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: EntityId,
    pub date: DateTime<Utc>,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub notes: String,
    pub marked_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewAttendance {
    pub date: DateTime<Utc>,
    pub status: AttendanceStatus,
    pub notes: String,
    pub marked_by: String,
}

impl NewAttendance {
    /// Marked by `system` with no notes
    pub fn new(date: DateTime<Utc>, status: AttendanceStatus) -> Self {
        Self {
            date,
            status,
            notes: String::new(),
            marked_by: "system".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Entity for AttendanceRecord {
    type Draft = NewAttendance;
    type Patch = AttendancePatch;

    const COLLECTION: &'static str = "attendance";
    const SORT: SortOrder = SortOrder::descending("date");

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_draft(id: EntityId, draft: &NewAttendance, now: DateTime<Utc>) -> Self {
        Self {
            id,
            date: draft.date,
            status: draft.status,
            notes: draft.notes.clone(),
            marked_by: draft.marked_by.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &AttendancePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl ChildEntity for AttendanceRecord {
    type ParentKey = EnrollmentKey;
}

/// Attendance counts for one enrollment
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AttendanceStats {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
    /// Share of `present` records, rounded to two decimals
    pub percentage: f64,
}

impl AttendanceStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AttendanceRecord>) -> Self {
        let mut stats = AttendanceStats::default();
        for record in records {
            stats.total += 1;
            match record.status {
                AttendanceStatus::Present => stats.present += 1,
                AttendanceStatus::Absent => stats.absent += 1,
                AttendanceStatus::Late => stats.late += 1,
                AttendanceStatus::Excused => stats.excused += 1,
            }
        }
        if stats.total > 0 {
            let ratio = stats.present as f64 / stats.total as f64;
            stats.percentage = (ratio * 10_000.0).round() / 100.0;
        }
        stats
    }
}

/// One line of a bulk attendance submission
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AttendanceEntry {
    pub key: EnrollmentKey,
    pub record: NewAttendance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(status: AttendanceStatus) -> AttendanceRecord {
        let now = Utc.with_ymd_and_hms(2024, 10, 1, 9, 0, 0).unwrap();
        AttendanceRecord::from_draft(
            EntityId::Persisted("a".to_string()),
            &NewAttendance::new(now, status),
            now,
        )
    }

    #[test]
    fn test_status_normalization() {
        assert_eq!(PaymentStatus::from_provider("SUCCESS"), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from_provider("PAID"), PaymentStatus::Paid);
        assert!(PaymentStatus::from_provider("EXPIRED").is_failure());
        assert!(!PaymentStatus::from_provider("UNPAID").is_terminal());
        assert_eq!(
            PaymentStatus::from_provider("REFUNDED"),
            PaymentStatus::Other("REFUNDED".to_string())
        );

        let check = PaymentStatusCheck::new("SUCCESS".to_string());
        assert!(check.paid);
        assert_eq!(check.status, "SUCCESS");
    }

    #[test]
    fn test_debug_output_hides_client_secret() {
        let config = Config::default_config(
            Environment::Stage,
            "./.data".to_string(),
            "school-shop".to_string(),
            "hunter2-secret".to_string(),
        );

        let printed = format!("{config:?}");
        assert!(printed.contains("school-shop"));
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("hunter2-secret"));
    }

    #[test]
    fn test_attendance_stats() {
        let records = vec![
            record(AttendanceStatus::Present),
            record(AttendanceStatus::Present),
            record(AttendanceStatus::Absent),
        ];
        let stats = AttendanceStats::from_records(&records);
        assert_eq!(3, stats.total);
        assert_eq!(2, stats.present);
        assert_eq!(1, stats.absent);
        assert_eq!(66.67, stats.percentage);

        let none: Vec<AttendanceRecord> = Vec::new();
        let empty = AttendanceStats::from_records(&none);
        assert_eq!(0.0, empty.percentage);
    }

    #[test]
    fn test_patch_leaves_missing_fields() {
        let now = Utc.with_ymd_and_hms(2024, 10, 1, 9, 0, 0).unwrap();
        let mut course = Course::from_draft(
            EntityId::Persisted("c1".to_string()),
            &NewCourse::new("Physics"),
            now,
        );
        course.apply_patch(&CoursePatch {
            credits: Some(4),
            ..Default::default()
        });
        assert_eq!("Physics", course.name);
        assert_eq!(4, course.credits);

        let json = serde_json::to_value(CoursePatch {
            credits: Some(4),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(serde_json::json!({ "credits": 4 }), json);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default_config(
            Environment::Stage,
            "./.data".to_string(),
            "id".to_string(),
            "secret".to_string(),
        );
        assert_eq!("https://fib.stage.fib.iq", config.provider.base_url);
        assert_eq!(Decimal::ONE, config.provider.amount);
        assert!(!config.provider.to_string().contains("secret"));
    }
}
