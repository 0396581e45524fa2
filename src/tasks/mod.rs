pub mod io_task;
