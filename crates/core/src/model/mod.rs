mod aggregate;
mod assignment;
mod content;
mod ids;
mod progress;

pub use aggregate::{FormationAggregate, LessonDetail};
pub use assignment::{Assignment, AssignmentError, AssignmentStatus, RegressionPolicy};
pub use content::ContentKind;
pub use ids::{AssignmentId, FormationId, LessonId, UserId};
pub use progress::{
    LessonProgress, ProgressError, ProgressUpdate, clamp_percentage, round_to_hundredths,
};
