// ============================================================================
// SketchFE Scripting — Rhai-driven automation of an editor session
// ============================================================================
//
// Scripts replay gestures and commands against a live session: pick tools and
// colors, press/move/release the pointer in device pixels, manage layers,
// undo/redo, copy/paste, and flip the lock.  Used by the headless CLI and by
// tests that want to describe an editing session as a short program.

use egui::{PointerButton, Pos2};
use rhai::{AST, Dynamic, Engine, EvalAltResult, ImmutableString, Position};
use std::sync::{Arc, Mutex};

use crate::components::tools::Tool;
use crate::lock::TimeLock;
use crate::session::EditorSession;

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, Clone)]
pub struct ScriptError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ScriptError {
    fn located(message: String, pos: Position) -> Self {
        Self {
            message,
            line: pos.line().filter(|l| *l > 0),
            column: pos.position().filter(|c| *c > 0),
        }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let (Some(line), Some(col)) = (self.line, self.column) {
            write!(f, "Line {}, Col {}: {}", line, col, self.message)
        } else if let Some(line) = self.line {
            write!(f, "Line {}: {}", line, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ScriptError {}

// ============================================================================
// Script context — shared mutable state between engine and host functions
// ============================================================================

struct ScriptContext {
    session: EditorSession,
    /// Lock owned on the script's behalf; `expire()` flips it.
    time_lock: TimeLock,
    /// Last device position handed to the pointer API.
    pointer: Pos2,
    console_output: Vec<String>,
}

type SharedContext = Arc<Mutex<ScriptContext>>;

type HostResult<T> = Result<T, Box<EvalAltResult>>;

fn with_ctx<R>(ctx: &SharedContext, f: impl FnOnce(&mut ScriptContext) -> R) -> R {
    let mut lock = ctx.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut lock)
}

fn number(v: &Dynamic, what: &str) -> HostResult<f32> {
    if let Ok(f) = v.as_float() {
        return Ok(f as f32);
    }
    if let Ok(i) = v.as_int() {
        return Ok(i as f32);
    }
    Err(format!("{} must be a number, got {}", what, v.type_name()).into())
}

fn point(x: &Dynamic, y: &Dynamic) -> HostResult<Pos2> {
    Ok(Pos2::new(number(x, "x")?, number(y, "y")?))
}

// ============================================================================
// Engine construction with sandbox + API registration
// ============================================================================

fn create_engine(ctx: SharedContext) -> Engine {
    let mut engine = Engine::new();

    // ── Sandbox limits ──
    engine.set_max_operations(50_000_000);
    engine.set_max_call_levels(64);
    engine.set_max_expr_depths(64, 64);
    engine.set_max_string_size(10_000);
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(1_000);

    let c = ctx.clone();
    engine.on_print(move |msg| {
        with_ctx(&c, |ctx| ctx.console_output.push(msg.to_string()));
    });

    register_tool_api(&mut engine, ctx.clone());
    register_pointer_api(&mut engine, ctx.clone());
    register_layer_api(&mut engine, ctx.clone());
    register_edit_api(&mut engine, ctx);

    engine
}

// ============================================================================
// Tools & color
// ============================================================================

fn register_tool_api(engine: &mut Engine, ctx: SharedContext) {
    let c = ctx.clone();
    engine.register_fn("tool", move |name: ImmutableString| -> HostResult<()> {
        let tool = Tool::from_label(&name).ok_or_else(|| format!("Unknown tool '{}'", name))?;
        with_ctx(&c, |ctx| ctx.session.set_tool(tool));
        Ok(())
    });

    let c = ctx.clone();
    engine.register_fn("color", move |hex: ImmutableString| -> HostResult<()> {
        with_ctx(&c, |ctx| ctx.session.colors_mut().set_hex(&hex)).map_err(|e| e.to_string().into())
    });

    let c = ctx.clone();
    engine.register_fn("size", move |v: Dynamic| -> HostResult<()> {
        let v = number(&v, "size")?;
        with_ctx(&c, |ctx| ctx.session.set_brush_size(v));
        Ok(())
    });

    let c = ctx.clone();
    engine.register_fn("alpha", move |v: Dynamic| -> HostResult<()> {
        let v = number(&v, "alpha")?;
        with_ctx(&c, |ctx| ctx.session.set_brush_alpha(v));
        Ok(())
    });

    let c = ctx.clone();
    engine.register_fn("smoothing", move |v: Dynamic| -> HostResult<()> {
        let v = number(&v, "smoothing")?;
        with_ctx(&c, |ctx| ctx.session.set_smoothing(v));
        Ok(())
    });

    let c = ctx.clone();
    engine.register_fn("eraser_strength", move |v: Dynamic| -> HostResult<()> {
        let v = number(&v, "eraser strength")?;
        with_ctx(&c, |ctx| ctx.session.set_eraser_strength(Some(v)));
        Ok(())
    });

    let c = ctx;
    engine.register_fn("pick_color", move || -> ImmutableString {
        with_ctx(&c, |ctx| {
            ctx.session.pick_color();
            ctx.session.colors().hex().into()
        })
    });
}

// ============================================================================
// Pointer
// ============================================================================

fn register_pointer_api(engine: &mut Engine, ctx: SharedContext) {
    let c = ctx.clone();
    engine.register_fn("press", move |x: Dynamic, y: Dynamic| -> HostResult<bool> {
        let p = point(&x, &y)?;
        Ok(with_ctx(&c, |ctx| {
            ctx.pointer = p;
            ctx.session.pointer_down(p, PointerButton::Primary)
        }))
    });

    let c = ctx.clone();
    engine.register_fn("press_secondary", move |x: Dynamic, y: Dynamic| -> HostResult<bool> {
        let p = point(&x, &y)?;
        Ok(with_ctx(&c, |ctx| {
            ctx.pointer = p;
            ctx.session.pointer_down(p, PointerButton::Secondary)
        }))
    });

    let c = ctx.clone();
    engine.register_fn("move_to", move |x: Dynamic, y: Dynamic| -> HostResult<()> {
        let p = point(&x, &y)?;
        with_ctx(&c, |ctx| {
            ctx.pointer = p;
            ctx.session.pointer_move(p);
        });
        Ok(())
    });

    let c = ctx.clone();
    engine.register_fn("hover", move |x: Dynamic, y: Dynamic| -> HostResult<()> {
        let p = point(&x, &y)?;
        with_ctx(&c, |ctx| {
            ctx.pointer = p;
            ctx.session.hover(p);
        });
        Ok(())
    });

    let c = ctx.clone();
    engine.register_fn("release", move || {
        with_ctx(&c, |ctx| {
            let p = ctx.pointer;
            ctx.session.pointer_up(p);
        });
    });

    let c = ctx.clone();
    engine.register_fn("leave", move || {
        with_ctx(&c, |ctx| {
            let p = ctx.pointer;
            ctx.session.pointer_leave(p);
        });
    });

    let c = ctx;
    engine.register_fn("wheel", move |delta: Dynamic| -> HostResult<bool> {
        let delta = number(&delta, "delta")?;
        Ok(with_ctx(&c, |ctx| ctx.session.wheel(delta)))
    });
}

// ============================================================================
// Layers
// ============================================================================

fn register_layer_api(engine: &mut Engine, ctx: SharedContext) {
    let c = ctx.clone();
    engine.register_fn("add_layer", move || -> i64 {
        with_ctx(&c, |ctx| {
            ctx.session.add_layer(None);
            ctx.session.layers().len() as i64
        })
    });

    let c = ctx.clone();
    engine.register_fn("add_layer", move |name: ImmutableString| -> i64 {
        with_ctx(&c, |ctx| {
            ctx.session.add_layer(Some(name.as_str()));
            ctx.session.layers().len() as i64
        })
    });

    let c = ctx.clone();
    engine.register_fn("layer_count", move || -> i64 {
        with_ctx(&c, |ctx| ctx.session.layers().len() as i64)
    });

    let c = ctx.clone();
    engine.register_fn("select_layer", move |index: i64| -> HostResult<()> {
        let ok = usize::try_from(index).is_ok_and(|i| with_ctx(&c, |ctx| ctx.session.select_layer(i)));
        if ok { Ok(()) } else { Err(format!("No layer at index {}", index).into()) }
    });

    // Scripts are explicit, so destructive commands confirm themselves.
    let c = ctx.clone();
    engine.register_fn("delete_layer", move || -> bool {
        with_ctx(&c, |ctx| ctx.session.delete_active_layer(|_| true))
    });

    let c = ctx.clone();
    engine.register_fn("clear_layer", move || -> bool {
        with_ctx(&c, |ctx| ctx.session.clear_active_layer(|_| true))
    });

    let c = ctx.clone();
    engine.register_fn("rename_layer", move |name: ImmutableString| -> HostResult<bool> {
        with_ctx(&c, |ctx| {
            let id = active_id(ctx)?;
            Ok(ctx.session.rename_layer(id, &name))
        })
    });

    let c = ctx.clone();
    engine.register_fn("set_opacity", move |v: Dynamic| -> HostResult<bool> {
        let v = number(&v, "opacity")?;
        with_ctx(&c, |ctx| {
            let id = active_id(ctx)?;
            Ok(ctx.session.set_layer_opacity(id, v))
        })
    });

    let c = ctx.clone();
    engine.register_fn("set_visible", move |visible: bool| -> HostResult<bool> {
        with_ctx(&c, |ctx| {
            let id = active_id(ctx)?;
            Ok(ctx.session.set_layer_visible(id, visible))
        })
    });

    // move_layer(+1) raises the active layer, move_layer(-1) lowers it.
    let c = ctx;
    engine.register_fn("move_layer", move |delta: i64| -> HostResult<bool> {
        with_ctx(&c, |ctx| {
            let id = active_id(ctx)?;
            Ok(match delta.signum() {
                1 => ctx.session.move_layer_up(id),
                -1 => ctx.session.move_layer_down(id),
                _ => false,
            })
        })
    });
}

fn active_id(ctx: &ScriptContext) -> HostResult<crate::canvas::LayerId> {
    ctx.session
        .active_layer()
        .map(|l| l.id)
        .ok_or_else(|| crate::io::EditorError::NoActiveLayer.to_string().into())
}

// ============================================================================
// Editing commands
// ============================================================================

fn register_edit_api(engine: &mut Engine, ctx: SharedContext) {
    let c = ctx.clone();
    engine.register_fn("undo", move || -> bool {
        with_ctx(&c, |ctx| ctx.session.undo().is_some())
    });

    let c = ctx.clone();
    engine.register_fn("redo", move || -> bool {
        with_ctx(&c, |ctx| ctx.session.redo().is_some())
    });

    let c = ctx.clone();
    engine.register_fn("copy", move || -> bool {
        with_ctx(&c, |ctx| match ctx.session.copy_selection() {
            Ok(copied) => copied,
            Err(e) => {
                ctx.console_output.push(e.to_string());
                false
            }
        })
    });

    let c = ctx.clone();
    engine.register_fn("paste", move || -> bool {
        with_ctx(&c, |ctx| ctx.session.paste_selection())
    });

    let c = ctx.clone();
    engine.register_fn("confirm_selection", move || -> bool {
        with_ctx(&c, |ctx| ctx.session.commit_selection().is_some())
    });

    let c = ctx.clone();
    engine.register_fn("cancel_selection", move || -> bool {
        with_ctx(&c, |ctx| ctx.session.cancel_selection().is_some())
    });

    let c = ctx.clone();
    engine.register_fn("has_selection", move || -> bool {
        with_ctx(&c, |ctx| ctx.session.selection().is_some())
    });

    let c = ctx;
    engine.register_fn("expire", move |expired: bool| {
        with_ctx(&c, |ctx| {
            ctx.time_lock.set_expired(expired);
            ctx.session.sync_lock();
        });
    });
}

// ============================================================================
// Public execution API
// ============================================================================

/// Compile a script without running it.
pub fn compile_script(source: &str) -> Result<AST, ScriptError> {
    Engine::new()
        .compile(source)
        .map_err(|e| ScriptError::located(e.to_string(), e.position()))
}

/// Runs scripts against one session.  The session stays inside the runner
/// between runs; reach it through [`with_session`](Self::with_session).
pub struct ScriptRunner {
    ctx: SharedContext,
}

impl ScriptRunner {
    pub fn new(mut session: EditorSession) -> Self {
        let time_lock = TimeLock::new();
        session.set_lock_signal(time_lock.signal());
        Self {
            ctx: Arc::new(Mutex::new(ScriptContext {
                session,
                time_lock,
                pointer: Pos2::ZERO,
                console_output: Vec::new(),
            })),
        }
    }

    pub fn run(&self, source: &str) -> Result<(), ScriptError> {
        let engine = create_engine(self.ctx.clone());
        let ast = engine
            .compile(source)
            .map_err(|e| ScriptError::located(e.to_string(), e.position()))?;
        engine
            .run_ast(&ast)
            .map_err(|e| ScriptError::located(e.to_string(), e.position()))
    }

    /// Everything the scripts printed so far.
    pub fn console_output(&self) -> Vec<String> {
        with_ctx(&self.ctx, |ctx| ctx.console_output.clone())
    }

    pub fn with_session<R>(&self, f: impl FnOnce(&mut EditorSession) -> R) -> R {
        with_ctx(&self.ctx, |ctx| f(&mut ctx.session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EditorConfig;

    fn runner() -> ScriptRunner {
        ScriptRunner::new(EditorSession::create(&EditorConfig::default()))
    }

    #[test]
    fn script_paints_and_undoes() {
        let r = runner();
        r.run(
            r##"
            color("#FF0000");
            size(10);
            press(10, 10); move_to(50.5, 10); move_to(90, 10); release();
            "##,
        )
        .unwrap();
        r.with_session(|s| {
            assert_eq!(*s.layers()[0].pixels.get_pixel(50, 10), image::Rgba([255, 0, 0, 255]));
            assert_eq!(s.colors().history_len(), 1);
        });
        r.run("undo();").unwrap();
        r.with_session(|s| assert!(s.layers()[0].pixels.is_blank()));
    }

    #[test]
    fn print_is_captured() {
        let r = runner();
        r.run(r#"print("layers: " + layer_count());"#).unwrap();
        assert_eq!(r.console_output(), vec!["layers: 1".to_string()]);
    }

    #[test]
    fn syntax_errors_carry_a_position() {
        let err = compile_script("let x = ;").unwrap_err();
        assert_eq!(err.line, Some(1));
        assert!(err.column.is_some());
        assert!(err.to_string().starts_with("Line 1"));
    }

    #[test]
    fn host_errors_surface_as_script_errors() {
        let r = runner();
        let err = r.run("\n\ntool(\"spray\");").unwrap_err();
        assert!(err.message.contains("spray"));
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn expire_blocks_further_edits() {
        let r = runner();
        r.run("expire(true); let ok = press(5, 5); if ok { throw \"press while locked\"; }")
            .unwrap();
        r.with_session(|s| assert!(s.is_locked()));
        r.run("expire(false);").unwrap();
        r.with_session(|s| assert!(!s.is_locked()));
    }
}
