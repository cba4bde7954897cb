// Unit tests harness
mod classes {
    include!("classes.rs");
}
mod exceptions {
    include!("exceptions.rs");
}
mod fibers {
    include!("fibers.rs");
}
mod native {
    include!("native.rs");
}
mod scheduler {
    include!("scheduler.rs");
}
mod units {
    include!("units.rs");
}
