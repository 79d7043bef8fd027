//! `switchboard tasks ...`: reads the SQLite audit log directly.

use sb_domain::config::{Config, HomeLayout};
use sb_domain::error::Error;
use sb_tasklog::{TaskLog, TaskRecord};

use crate::api::tasks::TaskParams;
use crate::cli::{print_json, TaskFilterArgs, TasksCommand};

pub fn run(config: &Config, layout: &HomeLayout, cmd: TasksCommand) -> anyhow::Result<()> {
    if !config.task_log.enabled {
        return Err(Error::Validation("the task log is disabled (taskLog.enabled: false)".into()).into());
    }
    let log = TaskLog::open(&layout.task_log_dir(config))?;
    let result = dispatch(config, &log, cmd);
    log.close();
    result
}

fn dispatch(config: &Config, log: &TaskLog, cmd: TasksCommand) -> anyhow::Result<()> {
    match cmd {
        TasksCommand::List(filter) => list(log, filter, None)?,
        TasksCommand::Search { query, filter } => list(log, filter, Some(query))?,
        TasksCommand::Get { id, json } => {
            let record = log
                .get(id)?
                .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
            if json {
                return print_json(&record);
            }
            print_record(&record);
        }
        TasksCommand::Stats { json } => {
            let stats = log.stats()?;
            if json {
                return print_json(&stats);
            }
            println!("total:        {}", stats.total);
            println!("tokens:       {} in / {} out", stats.tokens_input, stats.tokens_output);
            if let Some(avg) = stats.avg_duration_ms {
                println!("avg duration: {avg:.0} ms");
            }
            if let (Some(first), Some(last)) = (&stats.earliest, &stats.latest) {
                println!("range:        {first} .. {last}");
            }
            for (title, map) in [
                ("by action", &stats.by_action),
                ("by module", &stats.by_module),
                ("by status", &stats.by_status),
            ] {
                println!("\n{title}:");
                for (k, n) in map {
                    println!("  {k:<20} {n}");
                }
            }
        }
        TasksCommand::Clean { days, max_records } => {
            let days = days.unwrap_or(config.task_log.retention_days);
            let max = max_records.unwrap_or(config.task_log.max_records);
            let deleted = log.cleanup(days, max)?;
            println!("Deleted {deleted} record(s) (older than {days} days or beyond {max}).");
        }
        TasksCommand::Count => println!("{}", log.count()?),
    }
    Ok(())
}

fn list(log: &TaskLog, filter: TaskFilterArgs, search: Option<String>) -> anyhow::Result<()> {
    let json = filter.json;
    let query = TaskParams {
        action: filter.action,
        module: filter.module,
        channel: filter.channel,
        status: filter.status,
        search,
        since: filter.since,
        until: filter.until,
        sort: filter.sort,
        order: filter.order,
        limit: Some(filter.limit),
        offset: Some(filter.offset),
    }
    .into_query()?;

    let page = log.query(&query)?;
    if json {
        return print_json(&page);
    }
    for r in &page.records {
        println!(
            "{:>6}  {}  {:<8} {:<14} {:<8} {}",
            r.id,
            r.created_at,
            r.action,
            r.module,
            r.status.as_str(),
            one_line(&r.request, 60),
        );
    }
    println!(
        "\n{} of {} record(s)",
        page.records.len(),
        page.total
    );
    Ok(())
}

fn print_record(r: &TaskRecord) {
    println!("id:        {}", r.id);
    println!("created:   {}", r.created_at);
    println!("action:    {}", r.action);
    println!("module:    {}", r.module);
    println!("status:    {}", r.status.as_str());
    if let Some(ch) = &r.channel {
        println!("channel:   {ch}");
    }
    if let Some(key) = &r.session_key {
        println!("session:   {key}");
    }
    if let Some(ms) = r.duration_ms {
        println!("duration:  {ms} ms");
    }
    if let (Some(i), Some(o)) = (r.tokens_input, r.tokens_output) {
        println!("tokens:    {i} in / {o} out");
    }
    if let Some(note) = &r.note {
        println!("note:      {note}");
    }
    println!("\nrequest:\n{}", r.request);
    println!("\nresponse:\n{}", r.response);
}

/// First line of `s`, cut to `max` characters.
fn one_line(s: &str, max: usize) -> String {
    let line = s.lines().next().unwrap_or("");
    if line.chars().count() <= max {
        line.to_owned()
    } else {
        let cut: String = line.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_tasklog::{NewTask, TaskStatus};

    #[test]
    fn one_line_truncates_on_chars() {
        assert_eq!(one_line("hello\nworld", 10), "hello");
        assert_eq!(one_line("ééééé", 3), "éé…");
    }

    #[test]
    fn commands_run_against_a_fresh_log() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        let config = Config::default();
        {
            let log = TaskLog::open(&layout.task_log_dir(&config)).unwrap();
            log.log(NewTask::new("chat", "pipeline").request("hi").response("hello"))
                .unwrap();
            log.log(
                NewTask::new("chat", "pipeline")
                    .request("boom")
                    .status(TaskStatus::Error),
            )
            .unwrap();
            log.close();
        }

        run(&config, &layout, TasksCommand::Count).unwrap();
        run(
            &config,
            &layout,
            TasksCommand::Search {
                query: "boom".into(),
                filter: TaskFilterArgs {
                    limit: 10,
                    ..Default::default()
                },
            },
        )
        .unwrap();
        assert!(run(
            &config,
            &layout,
            TasksCommand::Get { id: 999, json: false }
        )
        .is_err());
        let bad_sort = run(
            &config,
            &layout,
            TasksCommand::List(TaskFilterArgs {
                sort: Some("nonsense".into()),
                limit: 10,
                ..Default::default()
            }),
        )
        .unwrap_err();
        assert_eq!(
            bad_sort.downcast::<Error>().unwrap().exit_code(),
            1
        );
    }
}
