//! Typed name definitions.

use crate::define_name;

define_name!(PackageName, "package");
define_name!(PlanName, "plan");
define_name!(JobName, "job");
define_name!(PodName, "pod");
define_name!(TaskName, "task");
