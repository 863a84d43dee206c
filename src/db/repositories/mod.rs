mod attendance;
mod participation;
mod students;
