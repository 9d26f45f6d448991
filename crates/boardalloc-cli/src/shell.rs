//! The line-oriented management shell. Each command parses its own argument
//! vector clap-style; bad arguments print usage and leave the allocator
//! untouched.

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use boardalloc_core::AppId;
use clap::Parser;

use crate::allocator::{AllocatorError, BoardAllocator, Driver};

#[derive(Parser, Debug)]
#[command(name = "init", about = "(re)create an empty allocator from a topology file")]
struct InitArgs {
    topo_file: PathBuf,
    /// Replace an existing allocator without asking.
    #[arg(short, long)]
    force: bool,
    /// Mark every switch-to-core channel as multi-ejection capable.
    #[arg(long)]
    multi_ejection: bool,
}

#[derive(Parser, Debug)]
#[command(name = "add_app", about = "add applications from communication files")]
struct AddAppArgs {
    #[arg(required = true)]
    comm_files: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(name = "rm_app", about = "remove applications")]
struct RmAppArgs {
    app_ids: Vec<usize>,
    /// Remove every application.
    #[arg(long)]
    all: bool,
}

#[derive(Parser, Debug)]
#[command(about = "run an optimization driver")]
struct RunArgs {
    /// Budget seconds.
    #[arg(short = 's', long, default_value_t = 0)]
    secs: u64,
    /// Budget minutes.
    #[arg(short = 'm', long, default_value_t = 0)]
    mins: u64,
    /// Budget hours.
    #[arg(long = "ho", default_value_t = 0)]
    hours: u64,
    /// Worker threads for parallel evaluation.
    #[arg(short = 'p', long, default_value_t = 1)]
    workers: usize,
    /// RNG seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl RunArgs {
    fn budget(&self) -> Duration {
        Duration::from_secs(self.secs + 60 * self.mins + 3600 * self.hours)
    }
}

#[derive(Parser, Debug)]
#[command(name = "status", about = "print a summary of the allocator")]
struct StatusArgs {
    /// Full dump of every record.
    #[arg(short, long)]
    full: bool,
}

#[derive(Parser, Debug)]
#[command(about = "tabular view")]
struct ShowArgs {
    /// Filter rows, e.g. `--where slot=0`.
    #[arg(long = "where", value_name = "col=value")]
    filter: Option<String>,
}

#[derive(Parser, Debug)]
#[command(name = "save", about = "save the allocator snapshot")]
struct SaveArgs {
    file: PathBuf,
}

#[derive(Parser, Debug)]
#[command(name = "load", about = "load an allocator snapshot")]
struct LoadArgs {
    file: PathBuf,
}

#[derive(Parser, Debug)]
#[command(name = "exit", about = "quit the shell")]
struct ExitArgs {
    /// Ask before discarding unsaved changes.
    #[arg(short, long)]
    interactive: bool,
}

/// Shell state: the current allocator and whether it has unsaved changes.
#[derive(Debug, Default)]
pub struct Shell {
    ba: Option<BoardAllocator>,
    dirty: bool,
}

impl Shell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one input line. Returns `false` when the shell should quit.
    pub fn handle_line(&mut self, line: &str) -> bool {
        let tokens = line.split_whitespace().collect::<Vec<_>>();
        let Some(&command) = tokens.first() else {
            return true;
        };
        match command {
            "init" => self.cmd_init(&tokens),
            "add_app" => self.cmd_add_app(&tokens),
            "rm_app" => self.cmd_rm_app(&tokens),
            "alns" => self.cmd_run(&tokens, Driver::Alns),
            "twoopt" => self.cmd_run(&tokens, Driver::TwoOpt),
            "nsga2" => self.cmd_run(&tokens, Driver::Nsga2),
            "ncga" => self.cmd_run(&tokens, Driver::Ncga),
            "spea2" => self.cmd_run(&tokens, Driver::Spea2),
            "apply" => self.cmd_apply(),
            "status" => self.cmd_status(&tokens),
            "show_apps" => self.cmd_show_apps(&tokens),
            "show_nodes" => self.cmd_show_nodes(&tokens),
            "show_flows" => self.cmd_show_flows(&tokens),
            "save" => self.cmd_save(&tokens),
            "load" => self.cmd_load(&tokens),
            "exit" => return self.cmd_exit(&tokens),
            _ => {
                println!("unknown command: {command}");
                println!(
                    "commands: init add_app rm_app alns twoopt nsga2 ncga spea2 \
                     apply status show_apps show_nodes show_flows save load exit"
                );
                true
            }
        }
    }

    fn parse<A: Parser>(tokens: &[&str]) -> Option<A> {
        match A::try_parse_from(tokens.iter().copied()) {
            Ok(args) => Some(args),
            Err(err) => {
                let _ = err.print();
                None
            }
        }
    }

    fn with_allocator(&mut self) -> Option<&mut BoardAllocator> {
        if self.ba.is_none() {
            println!("there is no allocator; run 'init' or 'load' first");
        }
        self.ba.as_mut()
    }

    fn cmd_init(&mut self, tokens: &[&str]) -> bool {
        let Some(args) = Self::parse::<InitArgs>(tokens) else {
            return true;
        };
        if self.ba.is_some() && !args.force {
            println!("an allocator already exists; use 'init -f' to replace it");
            return true;
        }
        match BoardAllocator::new(&args.topo_file, args.multi_ejection) {
            Ok(ba) => {
                println!(
                    "initialized allocator with {} boards",
                    ba.unit().fabric().nr_cores()
                );
                self.ba = Some(ba);
                self.dirty = false;
            }
            Err(err) => println!("init failed: {err}"),
        }
        true
    }

    fn cmd_add_app(&mut self, tokens: &[&str]) -> bool {
        let Some(args) = Self::parse::<AddAppArgs>(tokens) else {
            return true;
        };
        let Some(ba) = self.with_allocator() else {
            return true;
        };
        let mut changed = false;
        for file in &args.comm_files {
            match ba.load_app(file) {
                Ok(true) => {
                    println!("{} successfully added", file.display());
                    changed = true;
                }
                Ok(false) => println!("failed to add {}: too many boards", file.display()),
                Err(err) => println!("failed to add {}: {err}", file.display()),
            }
        }
        self.dirty |= changed;
        true
    }

    fn cmd_rm_app(&mut self, tokens: &[&str]) -> bool {
        let Some(args) = Self::parse::<RmAppArgs>(tokens) else {
            return true;
        };
        let Some(ba) = self.with_allocator() else {
            return true;
        };
        let targets = if args.all {
            ba.app_ids()
        } else if args.app_ids.is_empty() {
            println!("no application specified");
            return true;
        } else {
            args.app_ids.iter().map(|&id| AppId::new(id)).collect()
        };
        let mut changed = false;
        for id in targets {
            match ba.remove_app(id) {
                Ok(()) => {
                    println!("removed app {id}");
                    changed = true;
                }
                Err(err) => println!("{err}"),
            }
        }
        self.dirty |= changed;
        true
    }

    fn cmd_run(&mut self, tokens: &[&str], driver: Driver) -> bool {
        let Some(args) = Self::parse::<RunArgs>(tokens) else {
            return true;
        };
        let Some(ba) = self.with_allocator() else {
            return true;
        };
        match ba.optimize(driver, args.budget(), args.seed, args.workers) {
            Ok(fitness) => {
                let [slots, edges, boards] = fitness.values();
                println!("done: {slots} slots, {edges} flow edges, {boards} routed boards");
                self.dirty = true;
            }
            Err(AllocatorError::EmptyBudget) => {
                println!("total execution time must be greater than 0 seconds");
            }
            Err(err) => println!("optimization failed: {err}"),
        }
        true
    }

    fn cmd_apply(&mut self) -> bool {
        let Some(ba) = self.with_allocator() else {
            return true;
        };
        ba.apply();
        self.dirty = true;
        println!("applied; allocations are frozen");
        true
    }

    fn cmd_status(&mut self, tokens: &[&str]) -> bool {
        let Some(args) = Self::parse::<StatusArgs>(tokens) else {
            return true;
        };
        let Some(ba) = self.with_allocator() else {
            return true;
        };
        let unit = ba.unit();
        println!(
            "boards: {} ({} free), apps: {}, vNodes: {} ({} allocating)",
            unit.fabric().nr_cores(),
            unit.empty_rnodes().len(),
            unit.apps().count(),
            unit.vnodes().count(),
            unit.nr_allocating_vnodes(),
        );
        println!(
            "slots: {}, flow edges: {}, routed boards: {}, avg slots: {:.2}",
            unit.max_slot_num(),
            unit.total_flow_edges(),
            unit.routed_board_num(),
            unit.avg_slot_num(),
        );
        if args.full {
            self.cmd_show_apps(&["show_apps"]);
            self.cmd_show_nodes(&["show_nodes"]);
            self.cmd_show_flows(&["show_flows"]);
        }
        true
    }

    fn cmd_show_apps(&mut self, tokens: &[&str]) -> bool {
        let Some(args) = Self::parse::<ShowArgs>(tokens) else {
            return true;
        };
        let Some(ba) = self.with_allocator() else {
            return true;
        };
        let rows = ba
            .unit()
            .apps()
            .map(|app| {
                vec![
                    app.id.to_string(),
                    app.vnodes.len().to_string(),
                    app.flows.len().to_string(),
                    app.pairs.len().to_string(),
                    app.description.clone(),
                ]
            })
            .collect();
        print_table(
            &["app", "vnodes", "flows", "pairs", "source"],
            rows,
            args.filter.as_deref(),
        );
        true
    }

    fn cmd_show_nodes(&mut self, tokens: &[&str]) -> bool {
        let Some(args) = Self::parse::<ShowArgs>(tokens) else {
            return true;
        };
        let Some(ba) = self.with_allocator() else {
            return true;
        };
        let unit = ba.unit();
        let rows = unit
            .vnodes()
            .map(|v| {
                let board = v
                    .rnode
                    .map(|r| ba.board_label(r).to_string())
                    .unwrap_or_else(|| "-".into());
                vec![
                    v.id.to_string(),
                    board,
                    v.allocating.to_string(),
                    v.send_pairs.len().to_string(),
                    v.recv_pairs.len().to_string(),
                ]
            })
            .collect();
        print_table(
            &["vnode", "board", "allocating", "sends", "recvs"],
            rows,
            args.filter.as_deref(),
        );
        true
    }

    fn cmd_show_flows(&mut self, tokens: &[&str]) -> bool {
        let Some(args) = Self::parse::<ShowArgs>(tokens) else {
            return true;
        };
        let Some(ba) = self.with_allocator() else {
            return true;
        };
        let unit = ba.unit();
        let rows = unit
            .flows()
            .map(|f| {
                let slot = f
                    .slot
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".into());
                vec![
                    f.id.to_string(),
                    slot,
                    f.pairs.len().to_string(),
                    unit.flow_graph(f.id).nr_edges().to_string(),
                    f.allocating.to_string(),
                ]
            })
            .collect();
        print_table(
            &["flow", "slot", "pairs", "edges", "allocating"],
            rows,
            args.filter.as_deref(),
        );
        true
    }

    fn cmd_save(&mut self, tokens: &[&str]) -> bool {
        let Some(args) = Self::parse::<SaveArgs>(tokens) else {
            return true;
        };
        let Some(ba) = self.ba.as_ref() else {
            println!("there is no allocator; run 'init' or 'load' first");
            return true;
        };
        match rmp_serde::to_vec(ba).map_err(anyhow::Error::from).and_then(|bytes| {
            std::fs::write(&args.file, bytes).map_err(anyhow::Error::from)
        }) {
            Ok(()) => {
                println!("saved allocator to {}", args.file.display());
                self.dirty = false;
            }
            Err(err) => println!("save failed: {err}"),
        }
        true
    }

    fn cmd_load(&mut self, tokens: &[&str]) -> bool {
        let Some(args) = Self::parse::<LoadArgs>(tokens) else {
            return true;
        };
        let loaded = std::fs::read(&args.file)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| rmp_serde::from_slice(&bytes).map_err(anyhow::Error::from));
        match loaded {
            Ok(ba) => {
                self.ba = Some(ba);
                self.dirty = false;
                println!("loaded allocator from {}", args.file.display());
            }
            Err(err) => println!("load failed: {err}"),
        }
        true
    }

    fn cmd_exit(&mut self, tokens: &[&str]) -> bool {
        let Some(args) = Self::parse::<ExitArgs>(tokens) else {
            return true;
        };
        if args.interactive && self.dirty && self.ba.is_some() {
            print!("discard unsaved changes? [y/n]: ");
            let _ = std::io::stdout().flush();
            let mut answer = String::new();
            if std::io::stdin().read_line(&mut answer).is_ok()
                && !answer.trim().eq_ignore_ascii_case("y")
            {
                println!("not exiting; save first");
                return true;
            }
        }
        false
    }
}

/// Prints an aligned table, optionally filtered by one `column=value`
/// predicate.
fn print_table(headers: &[&str], rows: Vec<Vec<String>>, filter: Option<&str>) {
    let rows = match filter {
        None => rows,
        Some(expr) => {
            let Some((column, value)) = expr.split_once('=') else {
                println!("bad --where expression {expr:?}; expected column=value");
                return;
            };
            let Some(idx) = headers.iter().position(|&h| h == column) else {
                println!("unknown column {column:?}; columns: {}", headers.join(", "));
                return;
            };
            rows.into_iter().filter(|r| r[idx] == value).collect()
        }
    };
    let mut widths = headers.iter().map(|h| h.len()).collect::<Vec<_>>();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.len());
        }
    }
    let line = |cells: Vec<&str>| {
        let padded = cells
            .iter()
            .zip(widths.iter().copied())
            .map(|(c, w)| format!("{c:<w$}"))
            .collect::<Vec<_>>();
        println!("{}", padded.join("  "));
    };
    line(headers.to_vec());
    for row in &rows {
        line(row.iter().map(String::as_str).collect());
    }
    println!("({} rows)", rows.len());
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn topo_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0 0 1 1\n1 0 2 1\n2 0 3 1\n3 0 0 1\n")
            .unwrap();
        file
    }

    fn comm_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0 1 0\n1 0 1\n").unwrap();
        file
    }

    #[test]
    fn unknown_command_keeps_the_shell_alive() {
        let mut shell = Shell::new();
        assert!(shell.handle_line("definitely_not_a_command"));
        assert!(shell.handle_line(""));
    }

    #[test]
    fn commands_without_an_allocator_do_not_crash() {
        let mut shell = Shell::new();
        assert!(shell.handle_line("status"));
        assert!(shell.handle_line("add_app whatever.txt"));
        assert!(shell.handle_line("alns -s 1"));
    }

    #[test]
    fn init_add_optimize_and_exit() {
        let topo = topo_file();
        let comm = comm_file();
        let mut shell = Shell::new();
        assert!(shell.handle_line(&format!("init {}", topo.path().display())));
        assert!(shell.ba.is_some());
        assert!(shell.handle_line(&format!("add_app {}", comm.path().display())));
        assert!(shell.dirty);
        assert!(shell.handle_line("status -f"));
        assert!(!shell.handle_line("exit"));
    }

    #[test]
    fn zero_budget_run_is_rejected() {
        let topo = topo_file();
        let comm = comm_file();
        let mut shell = Shell::new();
        shell.handle_line(&format!("init {}", topo.path().display()));
        shell.handle_line(&format!("add_app {}", comm.path().display()));
        let before = shell.ba.as_ref().unwrap().unit().clone();
        assert!(shell.handle_line("alns"));
        assert_eq!(*shell.ba.as_ref().unwrap().unit(), before);
    }

    #[test]
    fn save_then_load_round_trips() {
        let topo = topo_file();
        let comm = comm_file();
        let snapshot = tempfile::NamedTempFile::new().unwrap();
        let mut shell = Shell::new();
        shell.handle_line(&format!("init {}", topo.path().display()));
        shell.handle_line(&format!("add_app {}", comm.path().display()));
        let before = shell.ba.as_ref().unwrap().unit().clone();
        shell.handle_line(&format!("save {}", snapshot.path().display()));
        assert!(!shell.dirty);

        let mut restored = Shell::new();
        restored.handle_line(&format!("load {}", snapshot.path().display()));
        assert_eq!(*restored.ba.as_ref().unwrap().unit(), before);
    }

    #[test]
    fn rm_app_all_empties_the_allocator() {
        let topo = topo_file();
        let comm = comm_file();
        let mut shell = Shell::new();
        shell.handle_line(&format!("init {}", topo.path().display()));
        shell.handle_line(&format!("add_app {}", comm.path().display()));
        shell.handle_line("rm_app --all");
        assert_eq!(shell.ba.as_ref().unwrap().unit().apps().count(), 0);
    }

    #[test]
    fn init_without_force_never_replaces() {
        let topo = topo_file();
        let mut shell = Shell::new();
        shell.handle_line(&format!("init {}", topo.path().display()));
        let comm = comm_file();
        shell.handle_line(&format!("add_app {}", comm.path().display()));
        shell.handle_line(&format!("init {}", topo.path().display()));
        assert_eq!(shell.ba.as_ref().unwrap().unit().apps().count(), 1);
        shell.handle_line(&format!("init -f {}", topo.path().display()));
        assert_eq!(shell.ba.as_ref().unwrap().unit().apps().count(), 0);
    }
}
