use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rustyline::highlight::Highlighter;
use rustyline::hint::HistoryHinter;
use rustyline::{Completer, Helper, Hinter, Validator};
use serde::Serialize;
use serde_json::to_string_pretty;
use std::borrow::Cow;
use std::borrow::Cow::Owned;
use std::io::Write;
use std::time::Duration;
use student_records_sdk::models::{
    AttendanceEntry, AttendanceStatus, CoursePatch, CreatePaymentRequest, EnrollmentKey,
    NewAttendance, NewCourse, NewMark, NewStage, NewStudent, PollPolicy, StagePatch,
    StudentPatch,
};
use student_records_sdk::RecordsSdk;

#[derive(Clone, clap::clap_derive::Parser)]
pub(crate) enum Commands {
    /// Reload students, stages and courses from the store
    Reload {},

    /// List cached students
    ListStudents {
        /// Only show students in this stage
        #[arg(short, long)]
        stage: Option<String>,

        /// Ask the store instead of the local cache (requires --stage)
        #[arg(short, long)]
        remote: bool,
    },

    /// Register a new student
    AddStudent {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        email: Option<String>,

        #[arg(short, long)]
        phone: Option<String>,

        /// Stage id
        #[arg(short, long)]
        stage: Option<String>,

        /// Date of birth (YYYY-MM-DD)
        #[arg(short, long)]
        dob: Option<NaiveDate>,
    },

    /// Change a student's details
    UpdateStudent {
        id: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        email: Option<String>,

        #[arg(short, long)]
        phone: Option<String>,

        /// Stage id
        #[arg(short, long)]
        stage: Option<String>,
    },

    /// Delete a student
    DeleteStudent { id: String },

    /// List cached stages
    ListStages {},

    /// Create a stage
    AddStage {
        #[arg(short, long)]
        name: String,

        #[arg(short, long, default_value = "1")]
        level: u32,

        /// Academic year, defaults to the current year
        #[arg(short, long)]
        year: Option<String>,
    },

    /// Rename or move a stage
    UpdateStage {
        id: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        level: Option<u32>,
    },

    /// Delete a stage
    DeleteStage { id: String },

    /// List cached courses
    ListCourses {},

    /// Create a course
    AddCourse {
        #[arg(short, long)]
        name: String,

        #[arg(short, long, default_value = "")]
        code: String,

        #[arg(long, default_value = "3")]
        credits: u32,

        /// Stage id
        #[arg(short, long)]
        stage: Option<String>,

        #[arg(short, long, default_value = "")]
        instructor: String,
    },

    /// Change a course's details
    UpdateCourse {
        id: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        credits: Option<u32>,

        #[arg(short, long)]
        instructor: Option<String>,
    },

    /// Delete a course
    DeleteCourse { id: String },

    /// Enroll a student in one or more courses
    Enroll {
        /// Student id
        student: String,

        /// Course ids
        #[arg(required = true)]
        courses: Vec<String>,
    },

    /// Show the courses a student is enrolled in
    StudentCourses {
        /// Student id
        student: String,
    },

    /// Record a mark for an enrollment
    AddMark {
        student: String,
        enrollment: String,

        #[arg(short, long)]
        assessment: String,

        #[arg(short, long)]
        score: f64,

        #[arg(short, long, default_value = "100")]
        max_score: f64,
    },

    /// Show the marks of an enrollment
    Marks { student: String, enrollment: String },

    /// Record attendance for one or more enrollments of a student on the same day
    MarkAttendance {
        student: String,

        /// Enrollment ids
        #[arg(required = true)]
        enrollments: Vec<String>,

        /// present, absent, late or excused
        #[arg(short, long)]
        status: AttendanceStatus,

        /// Day of the session (YYYY-MM-DD), defaults to now
        #[arg(short, long)]
        date: Option<NaiveDate>,

        #[arg(short, long, default_value = "")]
        notes: String,
    },

    /// Show attendance and statistics for an enrollment
    Attendance { student: String, enrollment: String },

    /// Create a registration fee payment
    Pay {
        /// Amount in the configured currency, defaults to the configured fee
        #[arg(short, long)]
        amount: Option<Decimal>,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Check the status of a payment
    PaymentStatus { id: String },

    /// Cancel a pending payment
    CancelPayment { id: String },

    /// Wait until a payment is paid, fails or the attempts run out
    WaitPayment {
        id: String,

        #[arg(short, long, default_value = "60")]
        attempts: u32,

        /// Seconds between status checks
        #[arg(short, long, default_value = "5")]
        interval: u64,
    },

    /// Exit the interactive shell (interactive mode only)
    #[command(hide = true)]
    Exit {},
}

#[derive(Helper, Completer, Hinter, Validator)]
pub(crate) struct CliHelper {
    #[rustyline(Hinter)]
    pub(crate) hinter: HistoryHinter,
}

impl Highlighter for CliHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Owned("\x1b[1m".to_owned() + hint + "\x1b[m")
    }
}

#[derive(Serialize)]
pub(crate) struct CommandResult<T: Serialize> {
    pub success: bool,
    pub message: T,
}

macro_rules! command_result {
    ($expr:expr) => {{
        to_string_pretty(&CommandResult {
            success: true,
            message: $expr,
        })?
    }};
}

macro_rules! wait_confirmation {
    ($prompt:expr,$result:expr) => {
        print!("{}", $prompt);
        std::io::stdout().flush()?;

        let mut buf = String::new();
        std::io::stdin().read_line(&mut buf)?;
        if !buf.trim_start().starts_with(['y', 'Y']) {
            return Ok(command_result!($result));
        }
    };
}

pub(crate) async fn execute_command(
    command: Commands,
    sdk: &RecordsSdk,
) -> Result<String, anyhow::Error> {
    Ok(match command {
        Commands::Reload {} => {
            sdk.load_all().await?;
            command_result!(format!(
                "Loaded {} students, {} stages, {} courses",
                sdk.students().len(),
                sdk.stages().len(),
                sdk.courses().len()
            ))
        }
        Commands::ListStudents { stage, remote } => {
            let students = match (stage, remote) {
                (Some(stage), true) => sdk.fetch_students_in_stage(&stage).await?,
                (Some(stage), false) => sdk.students_in_stage(&stage),
                (None, true) => return Err(anyhow::anyhow!("--remote requires --stage")),
                (None, false) => sdk.students().records(),
            };

            println!("{:<24} {:<28} {:<28} Stage", "ID", "Name", "Email");
            println!("{}", "-".repeat(100));
            for student in students {
                println!(
                    "{:<24} {:<28} {:<28} {}",
                    student.id.to_string(),
                    student.name,
                    student.email.unwrap_or_default(),
                    student.stage_id.unwrap_or_default()
                );
            }
            "".to_string()
        }
        Commands::AddStudent {
            name,
            email,
            phone,
            stage,
            dob,
        } => {
            let student = sdk
                .students()
                .add(NewStudent {
                    email,
                    phone,
                    stage_id: stage,
                    date_of_birth: dob,
                    ..NewStudent::new(name)
                })
                .await?;
            command_result!(student)
        }
        Commands::UpdateStudent {
            id,
            name,
            email,
            phone,
            stage,
        } => {
            let patch = StudentPatch {
                name,
                email,
                phone,
                stage_id: stage,
                ..Default::default()
            };
            let student = sdk.students().update(&id, patch).await?;
            command_result!(student)
        }
        Commands::DeleteStudent { id } => {
            wait_confirmation!(
                format!("Delete student {id}? (y/n): "),
                "Deletion cancelled by user."
            );
            sdk.students().delete(&id).await?;
            command_result!(format!("Deleted student {id}"))
        }
        Commands::ListStages {} => command_result!(sdk.stages().records()),
        Commands::AddStage { name, level, year } => {
            let mut draft = NewStage::new(name);
            draft.level = level;
            if let Some(year) = year {
                draft.academic_year = year;
            }
            command_result!(sdk.stages().add(draft).await?)
        }
        Commands::UpdateStage { id, name, level } => {
            let patch = StagePatch {
                name,
                level,
                ..Default::default()
            };
            command_result!(sdk.stages().update(&id, patch).await?)
        }
        Commands::DeleteStage { id } => {
            wait_confirmation!(
                format!("Delete stage {id}? (y/n): "),
                "Deletion cancelled by user."
            );
            sdk.stages().delete(&id).await?;
            command_result!(format!("Deleted stage {id}"))
        }
        Commands::ListCourses {} => command_result!(sdk.courses().records()),
        Commands::AddCourse {
            name,
            code,
            credits,
            stage,
            instructor,
        } => {
            let draft = NewCourse {
                code,
                credits,
                stage_id: stage,
                instructor_name: instructor,
                ..NewCourse::new(name)
            };
            command_result!(sdk.courses().add(draft).await?)
        }
        Commands::UpdateCourse {
            id,
            name,
            credits,
            instructor,
        } => {
            let patch = CoursePatch {
                name,
                credits,
                instructor_name: instructor,
                ..Default::default()
            };
            command_result!(sdk.courses().update(&id, patch).await?)
        }
        Commands::DeleteCourse { id } => {
            wait_confirmation!(
                format!("Delete course {id}? (y/n): "),
                "Deletion cancelled by user."
            );
            sdk.courses().delete(&id).await?;
            command_result!(format!("Deleted course {id}"))
        }
        Commands::Enroll { student, courses } => {
            if !sdk.enrollments().contains(&student) {
                sdk.load_student(&student).await?;
            }
            command_result!(sdk.assign_courses(&student, &courses).await?)
        }
        Commands::StudentCourses { student } => {
            sdk.load_student(&student).await?;
            command_result!(sdk.student_courses(&student))
        }
        Commands::AddMark {
            student,
            enrollment,
            assessment,
            score,
            max_score,
        } => {
            let key = EnrollmentKey::new(student, enrollment);
            let mark = sdk
                .marks()
                .add(
                    &key,
                    NewMark {
                        assessment,
                        score,
                        max_score,
                        recorded_at: Utc::now(),
                    },
                )
                .await?;
            command_result!(mark)
        }
        Commands::Marks {
            student,
            enrollment,
        } => {
            let key = EnrollmentKey::new(student, enrollment);
            sdk.load_enrollment(&key).await?;

            println!("{:<24} {:<20} {:>8} Recorded", "ID", "Assessment", "Score");
            println!("{}", "-".repeat(80));
            for mark in sdk.marks().records(&key) {
                println!(
                    "{:<24} {:<20} {:>8} {}",
                    mark.id.to_string(),
                    mark.assessment,
                    format!("{}/{}", mark.score, mark.max_score),
                    mark.recorded_at.format("%Y-%m-%d %H:%M")
                );
            }
            command_result!(sdk.mark_summary(&key))
        }
        Commands::MarkAttendance {
            student,
            enrollments,
            status,
            date,
            notes,
        } => {
            let date = match date {
                Some(day) => {
                    let midnight = day
                        .and_hms_opt(0, 0, 0)
                        .ok_or_else(|| anyhow::anyhow!("Invalid date: {day}"))?;
                    Utc.from_utc_datetime(&midnight)
                }
                None => Utc::now(),
            };
            let entries = enrollments
                .into_iter()
                .map(|enrollment| AttendanceEntry {
                    key: EnrollmentKey::new(student.clone(), enrollment),
                    record: NewAttendance {
                        notes: notes.clone(),
                        ..NewAttendance::new(date, status)
                    },
                })
                .collect();
            command_result!(sdk.record_bulk_attendance(entries).await?)
        }
        Commands::Attendance {
            student,
            enrollment,
        } => {
            let key = EnrollmentKey::new(student, enrollment);
            sdk.load_enrollment(&key).await?;

            println!("{:<24} {:<12} {:<10} Notes", "ID", "Date", "Status");
            println!("{}", "-".repeat(80));
            for record in sdk.attendance().records(&key) {
                println!(
                    "{:<24} {:<12} {:<10} {}",
                    record.id.to_string(),
                    record.date.format("%Y-%m-%d"),
                    record.status.to_string(),
                    record.notes
                );
            }
            command_result!(sdk.attendance_stats(&key))
        }
        Commands::Pay {
            amount,
            description,
        } => {
            let session = sdk
                .create_payment(CreatePaymentRequest {
                    amount,
                    description,
                })
                .await?;
            println!("Payment code: {}", session.readable_code);
            println!("Valid until: {}", session.valid_until);
            command_result!(session)
        }
        Commands::PaymentStatus { id } => command_result!(sdk.check_payment_status(&id).await?),
        Commands::CancelPayment { id } => {
            wait_confirmation!(
                format!("Cancel payment {id}? (y/n): "),
                "Payment left as is."
            );
            command_result!(sdk.cancel_payment(&id).await?)
        }
        Commands::WaitPayment {
            id,
            attempts,
            interval,
        } => {
            println!("Waiting for payment {id}...");
            let outcome = sdk
                .wait_for_payment(
                    &id,
                    PollPolicy {
                        max_attempts: attempts,
                        interval: Duration::from_secs(interval),
                    },
                )
                .await?;
            command_result!(outcome)
        }
        Commands::Exit {} => {
            command_result!("Exiting...")
        }
    })
}
