use super::{ProjectId, UserId};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

identifier!(ApplicationId);

/// Kind of seat a position is materialized into.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatType {
    Scholarship,
    Volunteer,
}

impl SeatType {
    pub fn as_str(self) -> &'static str {
        match self {
            SeatType::Scholarship => "scholarship",
            SeatType::Volunteer => "volunteer",
        }
    }

    pub fn selected_status(self) -> ApplicationStatus {
        match self {
            SeatType::Scholarship => ApplicationStatus::SelectedScholarship,
            SeatType::Volunteer => ApplicationStatus::SelectedVolunteer,
        }
    }

    pub fn accepted_status(self) -> ApplicationStatus {
        match self {
            SeatType::Scholarship => ApplicationStatus::AcceptedScholarship,
            SeatType::Volunteer => ApplicationStatus::AcceptedVolunteer,
        }
    }
}

impl fmt::Display for SeatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scholarship" => Ok(SeatType::Scholarship),
            "volunteer" => Ok(SeatType::Volunteer),
            other => Err(format!("unknown seat type {other}")),
        }
    }
}

/// Seat type asked for by the student when applying.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedSeat {
    Scholarship,
    Volunteer,
    Either,
}

impl RequestedSeat {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestedSeat::Scholarship => "scholarship",
            RequestedSeat::Volunteer => "volunteer",
            RequestedSeat::Either => "either",
        }
    }

    pub fn accepts(self, seat: SeatType) -> bool {
        match self {
            RequestedSeat::Either => true,
            RequestedSeat::Scholarship => seat == SeatType::Scholarship,
            RequestedSeat::Volunteer => seat == SeatType::Volunteer,
        }
    }
}

impl fmt::Display for RequestedSeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestedSeat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scholarship" => Ok(RequestedSeat::Scholarship),
            "volunteer" => Ok(RequestedSeat::Volunteer),
            "either" => Ok(RequestedSeat::Either),
            other => Err(format!("unknown requested seat {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Submitted,
    SelectedScholarship,
    SelectedVolunteer,
    RejectedByProfessor,
    AcceptedScholarship,
    AcceptedVolunteer,
    Declined,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Submitted => "SUBMITTED",
            ApplicationStatus::SelectedScholarship => "SELECTED_SCHOLARSHIP",
            ApplicationStatus::SelectedVolunteer => "SELECTED_VOLUNTEER",
            ApplicationStatus::RejectedByProfessor => "REJECTED_BY_PROFESSOR",
            ApplicationStatus::AcceptedScholarship => "ACCEPTED_SCHOLARSHIP",
            ApplicationStatus::AcceptedVolunteer => "ACCEPTED_VOLUNTEER",
            ApplicationStatus::Declined => "DECLINED",
        }
    }

    /// Seat type offered to the student, if the application is selected.
    pub fn selected_seat(self) -> Option<SeatType> {
        match self {
            ApplicationStatus::SelectedScholarship => Some(SeatType::Scholarship),
            ApplicationStatus::SelectedVolunteer => Some(SeatType::Volunteer),
            _ => None,
        }
    }

    /// Rejected and declined applications no longer block a new application
    /// of the same student to the same project.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ApplicationStatus::RejectedByProfessor | ApplicationStatus::Declined
        )
    }

    /// Candidates taking part in the ranking of a project.
    pub fn is_ranked(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Submitted
                | ApplicationStatus::SelectedScholarship
                | ApplicationStatus::SelectedVolunteer
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "SUBMITTED" => ApplicationStatus::Submitted,
            "SELECTED_SCHOLARSHIP" => ApplicationStatus::SelectedScholarship,
            "SELECTED_VOLUNTEER" => ApplicationStatus::SelectedVolunteer,
            "REJECTED_BY_PROFESSOR" => ApplicationStatus::RejectedByProfessor,
            "ACCEPTED_SCHOLARSHIP" => ApplicationStatus::AcceptedScholarship,
            "ACCEPTED_VOLUNTEER" => ApplicationStatus::AcceptedVolunteer,
            "DECLINED" => ApplicationStatus::Declined,
            other => return Err(format!("unknown application status {other}")),
        })
    }
}

/// The three component grades of an application, each within `[0, 10]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Grades {
    pub discipline: f64,
    pub selection: f64,
    pub coefficient: f64,
}

impl Grades {
    pub const MAX: f64 = 10.0;

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("discipline grade", self.discipline),
            ("selection grade", self.selection),
            ("academic coefficient", self.coefficient),
        ] {
            if !value.is_finite() || !(0.0..=Self::MAX).contains(&value) {
                return Err(Error::Validation(format!(
                    "{name} must be between 0 and {}, got {value}",
                    Self::MAX
                )));
            }
        }
        Ok(())
    }
}

/// Weighted final score, rounded to two decimal places.
pub fn final_score(grades: &Grades) -> f64 {
    let raw = (grades.discipline * 5.0 + grades.selection * 3.0 + grades.coefficient * 2.0) / 10.0;
    (raw * 100.0).round() / 100.0
}

#[derive(Clone, Debug, Serialize)]
pub struct Application {
    pub id: ApplicationId,
    pub project: ProjectId,
    pub student: UserId,
    pub requested_seat: RequestedSeat,
    pub grades: Option<Grades>,
    pub final_score: Option<f64>,
    pub status: ApplicationStatus,
    pub professor_feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grades(discipline: f64, selection: f64, coefficient: f64) -> Grades {
        Grades {
            discipline,
            selection,
            coefficient,
        }
    }

    #[test]
    fn test_final_score() {
        assert_eq!(final_score(&grades(8.0, 7.0, 9.0)), 7.9);
        assert_eq!(final_score(&grades(10.0, 10.0, 10.0)), 10.0);
        assert_eq!(final_score(&grades(0.0, 0.0, 0.0)), 0.0);
        // 8.55 * 5 + 6.3 * 3 + 7.77 * 2 = 77.19
        assert_eq!(final_score(&grades(8.55, 6.3, 7.77)), 7.72);
        let g = grades(6.25, 9.1, 3.3);
        assert_eq!(final_score(&g), final_score(&g));
    }

    #[test]
    fn test_grades_bounds() {
        assert!(grades(0.0, 10.0, 5.5).validate().is_ok());
        assert!(matches!(
            grades(10.5, 1.0, 1.0).validate(),
            Err(Error::Validation(_))
        ));
        assert!(grades(1.0, -0.1, 1.0).validate().is_err());
        assert!(grades(1.0, 1.0, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_requested_seat() {
        assert!(RequestedSeat::Either.accepts(SeatType::Scholarship));
        assert!(RequestedSeat::Volunteer.accepts(SeatType::Volunteer));
        assert!(!RequestedSeat::Volunteer.accepts(SeatType::Scholarship));
        assert_eq!(
            ApplicationStatus::SelectedVolunteer.selected_seat(),
            Some(SeatType::Volunteer)
        );
        assert!(ApplicationStatus::Declined.is_terminal());
        assert!(!ApplicationStatus::AcceptedScholarship.is_terminal());
    }
}
