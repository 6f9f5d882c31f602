//! Signal K paths handled by the course helper.

pub const ACTIVE_ROUTE_HREF: &str = "navigation.courseGreatCircle.activeRoute.href";
pub const ACTIVE_ROUTE_START_TIME: &str = "navigation.courseGreatCircle.activeRoute.startTime";
pub const NEXT_POINT_POSITION: &str = "navigation.courseGreatCircle.nextPoint.position";
pub const NEXT_POINT_ARRIVAL_CIRCLE: &str = "navigation.courseGreatCircle.nextPoint.arrivalCircle";
pub const PREVIOUS_POINT_POSITION: &str = "navigation.courseGreatCircle.previousPoint.position";

// Derived outputs, never accepted as writes.
pub const NEXT_POINT_BEARING_TRUE: &str = "navigation.courseGreatCircle.nextPoint.bearingTrue";
pub const NEXT_POINT_DISTANCE: &str = "navigation.courseGreatCircle.nextPoint.distance";

/// Vessel position input.
pub const POSITION: &str = "navigation.position";

pub const NOTIFICATIONS_PREFIX: &str = "notifications.";
pub const ARRIVAL_CIRCLE_NOTIFICATION: &str = "notifications.navigation.arrivalCircleEntered";

/// All writable course fields, in broadcast order.
pub const WRITABLE: [&str; 5] = [
    ACTIVE_ROUTE_HREF,
    ACTIVE_ROUTE_START_TIME,
    NEXT_POINT_POSITION,
    NEXT_POINT_ARRIVAL_CIRCLE,
    PREVIOUS_POINT_POSITION,
];
