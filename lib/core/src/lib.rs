pub mod cache;
pub mod clock;
pub mod error;
pub mod events;
mod logger;
pub mod models;
pub mod payment;
pub mod persist;
pub mod sdk_builder;

use cache::{EntityCache, Filter, GroupedCache};
use clock::Clock;
use error::{SdkError, StoreError};
use log::{info, warn};
use models::{
    AttendanceEntry, AttendanceRecord, AttendanceStats, Config, Course, CreatePaymentRequest,
    Enrollment, EnrollmentKey, Mark, MarkSummary, NewEnrollment, PaymentOutcome, PaymentSession,
    PaymentStatusCheck, PollPolicy, Stage, Student,
};
use payment::{HttpTransport, PaymentGateway};
use sdk_builder::RemoteStores;
use std::sync::Arc;
use tokio::sync::watch;

pub use events::{EventEmitter, EventListener, SdkEvent};
pub use persist::{RecordsBackend, RemoteStore, ScopedRemoteStore, SqliteRemoteStore};
pub use sdk_builder::SdkBuilder;

/// Enrollment name used when the course is not cached
const UNKNOWN_COURSE: &str = "Unknown Course";

/// Entry point tying the payment gateway and the entity caches together
#[derive(Clone)]
pub struct RecordsSdk {
    config: Config,
    clock: Arc<dyn Clock>,
    gateway: Arc<PaymentGateway>,
    students: Arc<EntityCache<Student>>,
    stages: Arc<EntityCache<Stage>>,
    courses: Arc<EntityCache<Course>>,
    enrollments: Arc<GroupedCache<Enrollment>>,
    marks: Arc<GroupedCache<Mark>>,
    attendance: Arc<GroupedCache<AttendanceRecord>>,
    event_emitter: Arc<EventEmitter>,
    shutdown_sender: watch::Sender<()>,
    shutdown_receiver: watch::Receiver<()>,
}

/// Builds the SDK with its default SQLite backend and loads the top-level collections
pub async fn connect(config: Config) -> Result<RecordsSdk, SdkError> {
    let sdk = SdkBuilder::new(config).build()?;
    sdk.load_all().await?;
    Ok(sdk)
}

impl RecordsSdk {
    pub(crate) fn new(
        config: Config,
        stores: RemoteStores,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        shutdown_sender: watch::Sender<()>,
        shutdown_receiver: watch::Receiver<()>,
    ) -> Self {
        let event_emitter = Arc::new(EventEmitter::new());
        let gateway = Arc::new(PaymentGateway::new(
            config.provider.clone(),
            transport,
            clock.clone(),
        ));

        Self {
            config,
            gateway,
            students: Arc::new(
                EntityCache::new(stores.students, clock.clone()).with_events(event_emitter.clone()),
            ),
            stages: Arc::new(
                EntityCache::new(stores.stages, clock.clone()).with_events(event_emitter.clone()),
            ),
            courses: Arc::new(
                EntityCache::new(stores.courses, clock.clone()).with_events(event_emitter.clone()),
            ),
            enrollments: Arc::new(
                GroupedCache::new(stores.enrollments, clock.clone())
                    .with_events(event_emitter.clone()),
            ),
            marks: Arc::new(
                GroupedCache::new(stores.marks, clock.clone()).with_events(event_emitter.clone()),
            ),
            attendance: Arc::new(
                GroupedCache::new(stores.attendance, clock.clone())
                    .with_events(event_emitter.clone()),
            ),
            clock,
            event_emitter,
            shutdown_sender,
            shutdown_receiver,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a listener to receive SDK events
    ///
    /// # Returns
    ///
    /// A unique identifier for the listener, which can be used to remove it later
    pub fn add_event_listener(&self, listener: Box<dyn EventListener>) -> String {
        self.event_emitter.add_listener(listener)
    }

    /// Removes a previously registered event listener
    ///
    /// # Returns
    ///
    /// `true` if the listener was found and removed, `false` otherwise
    pub fn remove_event_listener(&self, id: &str) -> bool {
        self.event_emitter.remove_listener(id)
    }

    /// Signals shutdown
    ///
    /// Any `wait_for_payment` running through this SDK stops with
    /// `SdkError::Payment(PaymentError::Cancelled)` at its next pause.
    pub fn disconnect(&self) -> Result<(), SdkError> {
        self.shutdown_sender
            .send(())
            .map_err(|_| SdkError::GenericError("Failed to send shutdown signal".to_string()))?;

        Ok(())
    }

    pub fn students(&self) -> &EntityCache<Student> {
        &self.students
    }

    pub fn stages(&self) -> &EntityCache<Stage> {
        &self.stages
    }

    pub fn courses(&self) -> &EntityCache<Course> {
        &self.courses
    }

    /// Enrollments, bucketed by student id
    pub fn enrollments(&self) -> &GroupedCache<Enrollment> {
        &self.enrollments
    }

    pub fn marks(&self) -> &GroupedCache<Mark> {
        &self.marks
    }

    pub fn attendance(&self) -> &GroupedCache<AttendanceRecord> {
        &self.attendance
    }

    pub fn gateway(&self) -> &PaymentGateway {
        &self.gateway
    }

    /// Reloads students, stages and courses
    ///
    /// Stops at the first collection that fails to load; the caches loaded
    /// before it keep their new contents.
    pub async fn load_all(&self) -> Result<(), SdkError> {
        self.students.fetch_all().await?;
        self.stages.fetch_all().await?;
        self.courses.fetch_all().await?;
        info!(
            "Loaded {} students, {} stages, {} courses",
            self.students.len(),
            self.stages.len(),
            self.courses.len()
        );
        Ok(())
    }

    /// Loads the enrollments of one student
    pub async fn load_student(&self, student_id: &str) -> Result<Vec<Enrollment>, SdkError> {
        Ok(self.enrollments.fetch(&student_id.to_string()).await?)
    }

    /// Loads the marks and attendance of one enrollment
    pub async fn load_enrollment(&self, key: &EnrollmentKey) -> Result<(), SdkError> {
        self.marks.fetch(key).await?;
        self.attendance.fetch(key).await?;
        Ok(())
    }

    /// Cached students in `stage_id`, sorted by name
    pub fn students_in_stage(&self, stage_id: &str) -> Vec<Student> {
        let mut students = self
            .students
            .filter(|student| student.stage_id.as_deref() == Some(stage_id));
        students.sort_by(|a, b| a.name.cmp(&b.name));
        students
    }

    /// Asks the store for the students in `stage_id`, leaving the cache alone
    pub async fn fetch_students_in_stage(&self, stage_id: &str) -> Result<Vec<Student>, SdkError> {
        Ok(self
            .students
            .query(&[Filter::eq("stageId", stage_id)])
            .await?)
    }

    /// Courses the student is enrolled in, from the cached enrollments
    ///
    /// An enrollment whose course is not cached is reported with the course
    /// name stored on the enrollment and the default credit count.
    pub fn student_courses(&self, student_id: &str) -> Vec<Course> {
        self.enrollments
            .records(&student_id.to_string())
            .into_iter()
            .map(|enrollment| {
                self.courses
                    .get(&enrollment.course_id)
                    .unwrap_or_else(|| Course {
                        id: enrollment.course_id.as_str().into(),
                        name: enrollment.course_name.clone(),
                        code: String::new(),
                        credits: 3,
                        stage_id: None,
                        instructor_name: String::new(),
                        description: String::new(),
                        created_at: enrollment.created_at,
                        updated_at: enrollment.updated_at,
                    })
            })
            .collect()
    }

    /// Enrolls a cached student in every listed course they are not already in
    ///
    /// Enrollments are added one at a time and the first failure is returned;
    /// enrollments confirmed before it stay.
    pub async fn assign_courses(
        &self,
        student_id: &str,
        course_ids: &[String],
    ) -> Result<Vec<Enrollment>, SdkError> {
        if self.students.get(student_id).is_none() {
            return Err(StoreError::NotFound {
                collection: "students".to_string(),
                id: student_id.to_string(),
            }
            .into());
        }

        let parent = student_id.to_string();
        let existing = self.enrollments.records(&parent);
        let mut added = Vec::new();
        for course_id in course_ids {
            let already_enrolled = existing
                .iter()
                .chain(added.iter())
                .any(|enrollment: &Enrollment| &enrollment.course_id == course_id);
            if already_enrolled {
                continue;
            }

            let course_name = self
                .courses
                .get(course_id)
                .map(|course| course.name)
                .unwrap_or_else(|| UNKNOWN_COURSE.to_string());
            let enrollment = self
                .enrollments
                .add(
                    &parent,
                    NewEnrollment {
                        course_id: course_id.clone(),
                        course_name,
                        enrolled_date: self.clock.now(),
                    },
                )
                .await?;
            added.push(enrollment);
        }

        info!("Assigned {} courses to {student_id}", added.len());
        Ok(added)
    }

    /// Records attendance entries in order, stopping at the first failure
    pub async fn record_bulk_attendance(
        &self,
        entries: Vec<AttendanceEntry>,
    ) -> Result<Vec<AttendanceRecord>, SdkError> {
        let mut recorded = Vec::with_capacity(entries.len());
        for entry in entries {
            let record = self.attendance.add(&entry.key, entry.record).await.map_err(|e| {
                warn!(
                    "Bulk attendance stopped after {} records: {e}",
                    recorded.len()
                );
                e
            })?;
            recorded.push(record);
        }
        Ok(recorded)
    }

    /// Attendance counts over the cached records of one enrollment
    pub fn attendance_stats(&self, key: &EnrollmentKey) -> AttendanceStats {
        AttendanceStats::from_records(&self.attendance.records(key))
    }

    /// Count and average score over the cached marks of one enrollment
    pub fn mark_summary(&self, key: &EnrollmentKey) -> MarkSummary {
        let marks = self.marks.records(key);
        let average = match marks.len() {
            0 => None,
            count => Some(marks.iter().map(|mark| mark.score).sum::<f64>() / count as f64),
        };
        MarkSummary {
            count: marks.len(),
            average,
        }
    }

    /// Creates a registration-fee payment with the provider
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentSession, SdkError> {
        let session = self.gateway.create_payment(request).await?;
        self.event_emitter.emit(&SdkEvent::PaymentCreated {
            session: session.clone(),
        });
        Ok(session)
    }

    pub async fn check_payment_status(
        &self,
        payment_id: &str,
    ) -> Result<PaymentStatusCheck, SdkError> {
        Ok(self.gateway.check_payment_status(payment_id).await?)
    }

    pub async fn cancel_payment(&self, payment_id: &str) -> Result<serde_json::Value, SdkError> {
        Ok(self.gateway.cancel_payment(payment_id).await?)
    }

    /// Polls the payment until it settles, cancelled by `disconnect`
    pub async fn wait_for_payment(
        &self,
        payment_id: &str,
        policy: PollPolicy,
    ) -> Result<PaymentOutcome, SdkError> {
        let outcome = self
            .gateway
            .wait_for_payment(payment_id, policy, Some(self.shutdown_receiver.clone()))
            .await?;

        let event = if outcome.success {
            SdkEvent::PaymentSettled {
                payment_id: payment_id.to_string(),
                outcome: outcome.clone(),
            }
        } else {
            SdkEvent::PaymentFailed {
                payment_id: payment_id.to_string(),
                outcome: outcome.clone(),
            }
        };
        self.event_emitter.emit(&event);

        Ok(outcome)
    }

    /// Configures a global SDK logger that will log to file and will forward log events to
    /// an optional application-specific logger.
    ///
    /// If called, it should be called before any SDK methods (for example, before `connect`).
    /// It must be called only once in the application lifecycle.
    ///
    /// ### Arguments
    ///
    /// - `log_dir`: Location where `records.log` will be created.
    /// - `app_logger`: Optional application logger.
    ///
    /// ### Errors
    ///
    /// An error is returned if the log file cannot be created or if a global logger is
    /// already configured.
    pub fn init_logging(
        log_dir: &str,
        app_logger: Option<Box<dyn log::Log>>,
    ) -> anyhow::Result<()> {
        logger::SdkLogger::init(log_dir, app_logger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_utils::ManualClock;
    use crate::error::PaymentError;
    use crate::events::test_utils::RecordingListener;
    use crate::models::{
        AttendanceStatus, Environment, NewAttendance, NewCourse, NewMark, NewStudent,
    };
    use crate::payment::transport::test_utils::MockTransport;
    use crate::persist::test_utils::FlakyStore;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    const TOKEN_OK: &str = r#"{"access_token":"tok-1","expires_in":3600}"#;

    fn sdk_with(store: &Arc<FlakyStore>, transport: &Arc<MockTransport>) -> RecordsSdk {
        let config = Config::default_config(
            Environment::Local,
            "./.data".to_string(),
            "client".to_string(),
            "secret".to_string(),
        );
        SdkBuilder::new(config)
            .backend(store.clone())
            .transport(transport.clone())
            .clock(Arc::new(ManualClock::new()))
            .build()
            .unwrap()
    }

    fn sdk(store: &Arc<FlakyStore>) -> RecordsSdk {
        sdk_with(store, &Arc::new(MockTransport::new()))
    }

    fn student_in(name: &str, stage_id: &str) -> NewStudent {
        NewStudent {
            stage_id: Some(stage_id.to_string()),
            ..NewStudent::new(name)
        }
    }

    fn persisted_id<E: cache::Entity>(record: &E) -> String {
        record.id().as_persisted().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_load_all_reads_every_collection() {
        let store = Arc::new(FlakyStore::new());
        RemoteStore::<Student>::create(store.inner(), &NewStudent::new("Zara"))
            .await
            .unwrap();
        RemoteStore::<Student>::create(store.inner(), &NewStudent::new("Ali"))
            .await
            .unwrap();
        RemoteStore::<Course>::create(store.inner(), &NewCourse::new("Algebra"))
            .await
            .unwrap();

        let sdk = sdk(&store);
        sdk.load_all().await.unwrap();

        let names: Vec<_> = sdk.students().records().into_iter().map(|s| s.name).collect();
        assert_eq!(vec!["Ali", "Zara"], names);
        assert_eq!(1, sdk.courses().len());
        assert!(sdk.stages().is_empty());
    }

    #[tokio::test]
    async fn test_students_in_stage() {
        let store = Arc::new(FlakyStore::new());
        let sdk = sdk(&store);
        sdk.students().add(student_in("Omar", "s1")).await.unwrap();
        sdk.students().add(student_in("Hana", "s2")).await.unwrap();
        sdk.students().add(student_in("Baraa", "s1")).await.unwrap();

        let names: Vec<_> = sdk
            .students_in_stage("s1")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(vec!["Baraa", "Omar"], names);

        let remote = sdk.fetch_students_in_stage("s2").await.unwrap();
        assert_eq!(1, remote.len());
        assert_eq!("Hana", remote[0].name);
    }

    #[tokio::test]
    async fn test_assign_courses_skips_existing_enrollments() {
        let store = Arc::new(FlakyStore::new());
        let sdk = sdk(&store);
        let student = sdk.students().add(NewStudent::new("Lana")).await.unwrap();
        let student_id = persisted_id(&student);
        let algebra = sdk.courses().add(NewCourse::new("Algebra")).await.unwrap();
        let biology = sdk.courses().add(NewCourse::new("Biology")).await.unwrap();
        let algebra_id = persisted_id(&algebra);
        let biology_id = persisted_id(&biology);

        let first = sdk
            .assign_courses(&student_id, &[algebra_id.clone()])
            .await
            .unwrap();
        assert_eq!(1, first.len());
        assert_eq!("Algebra", first[0].course_name);

        let second = sdk
            .assign_courses(
                &student_id,
                &[algebra_id.clone(), biology_id.clone(), biology_id.clone()],
            )
            .await
            .unwrap();
        assert_eq!(1, second.len());
        assert_eq!(biology_id, second[0].course_id);
        assert_eq!(2, sdk.enrollments().records(&student_id).len());
    }

    #[tokio::test]
    async fn test_assign_uncached_course_uses_placeholder_name() {
        let store = Arc::new(FlakyStore::new());
        let sdk = sdk(&store);
        let student = sdk.students().add(NewStudent::new("Lana")).await.unwrap();
        let student_id = persisted_id(&student);

        let added = sdk
            .assign_courses(&student_id, &["c-retired".to_string()])
            .await
            .unwrap();
        assert_eq!(1, added.len());
        assert_eq!("c-retired", added[0].course_id);
        assert_eq!("Unknown Course", added[0].course_name);
    }

    #[tokio::test]
    async fn test_assign_courses_requires_cached_student() {
        let store = Arc::new(FlakyStore::new());
        let sdk = sdk(&store);

        let err = sdk
            .assign_courses("missing", &["c1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Store(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_student_courses_falls_back_to_enrollment_name() {
        let store = Arc::new(FlakyStore::new());
        let sdk = sdk(&store);
        let student = sdk.students().add(NewStudent::new("Lana")).await.unwrap();
        let student_id = persisted_id(&student);
        let chemistry = sdk.courses().add(NewCourse::new("Chemistry")).await.unwrap();

        sdk.enrollments()
            .add(
                &student_id,
                NewEnrollment {
                    course_id: persisted_id(&chemistry),
                    course_name: "Chemistry".to_string(),
                    enrolled_date: Utc::now(),
                },
            )
            .await
            .unwrap();
        sdk.enrollments()
            .add(
                &student_id,
                NewEnrollment {
                    course_id: "retired".to_string(),
                    course_name: "Latin".to_string(),
                    enrolled_date: Utc::now(),
                },
            )
            .await
            .unwrap();

        let mut courses = sdk.student_courses(&student_id);
        courses.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(2, courses.len());
        assert_eq!(chemistry, courses[0]);
        assert_eq!("Latin", courses[1].name);
        assert_eq!(3, courses[1].credits);
        assert!(courses[1].id.is("retired"));
    }

    #[tokio::test]
    async fn test_bulk_attendance_and_stats() {
        let store = Arc::new(FlakyStore::new());
        let sdk = sdk(&store);
        let key = EnrollmentKey::new("s1", "e1");
        let statuses = [
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Late,
        ];
        let entries = statuses
            .iter()
            .enumerate()
            .map(|(day, status)| AttendanceEntry {
                key: key.clone(),
                record: NewAttendance::new(
                    Utc.with_ymd_and_hms(2024, 10, day as u32 + 1, 9, 0, 0).unwrap(),
                    *status,
                ),
            })
            .collect();

        let recorded = sdk.record_bulk_attendance(entries).await.unwrap();
        assert_eq!(3, recorded.len());

        let stats = sdk.attendance_stats(&key);
        assert_eq!(3, stats.total);
        assert_eq!(2, stats.present);
        assert_eq!(1, stats.late);
        assert_eq!(66.67, stats.percentage);
    }

    #[tokio::test]
    async fn test_bulk_attendance_propagates_failure() {
        let store = Arc::new(FlakyStore::new());
        let sdk = sdk(&store);
        let key = EnrollmentKey::new("s1", "e1");
        store.set_fail_writes(true);

        let err = sdk
            .record_bulk_attendance(vec![AttendanceEntry {
                key: key.clone(),
                record: NewAttendance::new(Utc::now(), AttendanceStatus::Absent),
            }])
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::Store(StoreError::Write { .. })));
        assert!(sdk.attendance().records(&key).is_empty());
        assert_eq!(0, sdk.attendance_stats(&key).total);
    }

    #[tokio::test]
    async fn test_mark_summary() {
        let store = Arc::new(FlakyStore::new());
        let sdk = sdk(&store);
        let key = EnrollmentKey::new("s1", "e1");
        assert_eq!(
            MarkSummary {
                count: 0,
                average: None
            },
            sdk.mark_summary(&key)
        );

        for score in [70.0, 85.0, 90.0] {
            sdk.marks()
                .add(
                    &key,
                    NewMark {
                        assessment: "Quiz".to_string(),
                        score,
                        max_score: 100.0,
                        recorded_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }

        let summary = sdk.mark_summary(&key);
        assert_eq!(3, summary.count);
        assert!((summary.average.unwrap() - 81.666).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_payment_events() {
        let store = Arc::new(FlakyStore::new());
        let transport = Arc::new(MockTransport::new());
        transport
            .on("/token", 200, TOKEN_OK)
            .on("/payments", 201, r#"{"paymentId":"p-1"}"#)
            .on("/status", 200, r#"{"status":"PAID"}"#);
        let sdk = sdk_with(&store, &transport);
        let listener = RecordingListener::default();
        sdk.add_event_listener(Box::new(listener.clone()));

        let session = sdk
            .create_payment(CreatePaymentRequest::default())
            .await
            .unwrap();
        let outcome = sdk
            .wait_for_payment(
                &session.payment_id,
                PollPolicy {
                    max_attempts: 3,
                    interval: Duration::ZERO,
                },
            )
            .await
            .unwrap();
        assert!(outcome.success);

        let events = listener.events();
        assert_eq!(2, events.len());
        assert!(matches!(
            &events[0],
            SdkEvent::PaymentCreated { session } if session.payment_id == "p-1"
        ));
        assert!(matches!(
            &events[1],
            SdkEvent::PaymentSettled { payment_id, .. } if payment_id == "p-1"
        ));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_wait_for_payment() {
        let store = Arc::new(FlakyStore::new());
        let transport = Arc::new(MockTransport::new());
        transport
            .on("/token", 200, TOKEN_OK)
            .on("/status", 200, r#"{"status":"PENDING"}"#);
        let sdk = sdk_with(&store, &transport);

        let waiting = sdk.clone();
        let handle = tokio::spawn(async move {
            waiting
                .wait_for_payment(
                    "p-1",
                    PollPolicy {
                        max_attempts: 60,
                        interval: Duration::from_secs(3600),
                    },
                )
                .await
        });

        while transport.calls("/status") == 0 {
            tokio::task::yield_now().await;
        }
        sdk.disconnect().unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(SdkError::Payment(PaymentError::Cancelled))
        ));
    }
}
