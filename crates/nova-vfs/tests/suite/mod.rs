mod failures;
mod local_fs;
mod modes;
mod support;
